// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tool catalog commands
//!
//! Commands: discover, list, show

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use toolrun_core::domain::tool_spec::ToolSpec;

use crate::embedded::EmbeddedRunner;

#[derive(Subcommand)]
pub enum ToolsCommand {
    /// Probe every local image for tool specs
    Discover {
        /// Report images without a spec or citation
        #[arg(short, long)]
        verbose: bool,
    },

    /// List discovered tools
    List {
        /// Case-insensitive substring of name or title
        #[arg(short, long, default_value = "")]
        filter: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one tool spec
    Show {
        /// Tool slug (<image>::<tool>)
        #[arg(value_name = "SLUG")]
        slug: String,

        /// Print JSON instead of YAML
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_command(
    command: ToolsCommand,
    config_path: Option<PathBuf>,
    user: Option<String>,
) -> Result<()> {
    let runner = EmbeddedRunner::new(config_path, user).await?;

    match command {
        ToolsCommand::Discover { verbose } => discover(&runner, verbose).await,
        ToolsCommand::List { filter, json } => list(&runner, &filter, json).await,
        ToolsCommand::Show { slug, json } => show(&runner, &slug, json).await,
    }
}

async fn discover(runner: &EmbeddedRunner, verbose: bool) -> Result<()> {
    let slugs = if runner.service().tools_discovered() {
        runner
            .service()
            .list_tool_specs("")
            .into_iter()
            .map(|spec| spec.id)
            .collect()
    } else {
        runner.discover(verbose).await?
    };

    if slugs.is_empty() {
        println!("{}", "No tools found".yellow());
        return Ok(());
    }

    println!("{}", format!("✓ Discovered {} tools", slugs.len()).green());
    for slug in slugs {
        println!("  {}", slug);
    }
    Ok(())
}

async fn list(runner: &EmbeddedRunner, filter: &str, json: bool) -> Result<()> {
    runner.ensure_discovered().await?;
    let specs = runner.service().list_tool_specs(filter);

    if json {
        println!("{}", serde_json::to_string_pretty(&specs)?);
        return Ok(());
    }

    if specs.is_empty() {
        println!("{}", "No tools found".yellow());
        return Ok(());
    }

    println!("{} tools found:", specs.len());
    println!("{:<50} {:<30} {}", "SLUG", "TITLE", "INPUTS");
    for spec in &specs {
        println!(
            "{:<50} {:<30} {}",
            spec.id.bold(),
            spec.title,
            describe_inputs(spec)
        );
    }
    Ok(())
}

async fn show(runner: &EmbeddedRunner, slug: &str, json: bool) -> Result<()> {
    let spec = runner.service().resolve_tool_spec(slug).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&spec)?);
    } else {
        print!("{}", serde_yaml::to_string(&spec)?);
    }
    Ok(())
}

fn describe_inputs(spec: &ToolSpec) -> String {
    let mut parts = Vec::new();
    if !spec.parameters.is_empty() {
        parts.push(format!("{} parameters", spec.parameters.len()));
    }
    if !spec.data.is_empty() {
        parts.push(format!("{} datasets", spec.data.len()));
    }
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join(", ")
    }
}
