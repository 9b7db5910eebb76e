// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Run lifecycle commands
//!
//! Commands: create, start, list, show, delete, results, result

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use toolrun_core::application::run_service::{CreateRunRequest, ServiceError};
use toolrun_core::domain::run::{Run, RunId, RunStatus};
use toolrun_core::domain::tool_spec::split_slug;

use crate::embedded::EmbeddedRunner;

#[derive(Subcommand)]
pub enum RunsCommand {
    /// Validate inputs and create a pending run
    Create {
        /// Tool slug (<image>::<tool>)
        #[arg(value_name = "SLUG")]
        slug: String,

        /// Parameter value; JSON literals are parsed, anything else is a string
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Dataset file on the host
        #[arg(short = 'd', long = "data", value_name = "NAME=PATH")]
        data: Vec<String>,

        /// Start the run and keep this process alive until it is terminal
        #[arg(long)]
        start: bool,

        /// Like --start, then list the result files (implies --start)
        #[arg(long)]
        wait: bool,

        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Start a pending run and block until it is terminal
    Start {
        #[arg(value_name = "RUN_ID")]
        id: i64,

        /// Also list the result files
        #[arg(long)]
        wait: bool,
    },

    /// List runs, newest first
    List {
        /// Only runs in this status
        #[arg(long)]
        status: Option<RunStatus>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show a run and its tool metadata
    Show {
        #[arg(value_name = "RUN_ID")]
        id: i64,

        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Delete a run and its workspace
    Delete {
        #[arg(value_name = "RUN_ID")]
        id: i64,
    },

    /// List the files a run produced
    Results {
        #[arg(value_name = "RUN_ID")]
        id: i64,
    },

    /// Print or save one result file
    Result {
        #[arg(value_name = "RUN_ID")]
        id: i64,

        /// Path relative to the output directory
        #[arg(value_name = "FILENAME")]
        filename: String,

        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

pub async fn handle_command(
    command: RunsCommand,
    config_path: Option<PathBuf>,
    user: Option<String>,
) -> Result<()> {
    let runner = EmbeddedRunner::new(config_path, user).await?;

    let result = match command {
        RunsCommand::Create {
            slug,
            params,
            data,
            start,
            wait,
            json,
        } => create(&runner, &slug, &params, &data, start || wait, wait, json).await,
        RunsCommand::Start { id, wait } => start_run(&runner, RunId(id), wait).await,
        RunsCommand::List { status, json } => list(&runner, status, json).await,
        RunsCommand::Show { id, json } => show(&runner, RunId(id), json).await,
        RunsCommand::Delete { id } => delete(&runner, RunId(id)).await,
        RunsCommand::Results { id } => results(&runner, RunId(id)).await,
        RunsCommand::Result { id, filename, output } => {
            result_file(&runner, RunId(id), &filename, output.as_deref()).await
        }
    };
    runner.shutdown().await;
    result.map_err(report)
}

/// Prints field-level validation errors before handing the error back.
fn report(err: anyhow::Error) -> anyhow::Error {
    if let Some(failure) = err
        .downcast_ref::<ServiceError>()
        .and_then(ServiceError::validation_failure)
    {
        eprintln!("{}", failure.message.red());
        for field in failure.errors.iter() {
            eprintln!("  {} {}", field.field.bold(), field.message);
        }
    }
    err
}

async fn create(
    runner: &EmbeddedRunner,
    slug: &str,
    params: &[String],
    data: &[String],
    start: bool,
    wait: bool,
    json: bool,
) -> Result<()> {
    let (image, tool) = split_slug(slug)
        .with_context(|| format!("Expected <image>::<tool>, got '{}'", slug))?;

    // warms the cache for this image without a full discovery pass
    runner.service().resolve_tool_spec(slug).await?;

    let request = CreateRunRequest {
        tool_name: tool.to_string(),
        docker_image: image.to_string(),
        parameters: parse_parameters(params)?,
        data: parse_datasets(data)?,
    };

    let run = if start {
        let result = runner
            .service()
            .create_and_start_run(runner.user(), request)
            .await?;
        if let Some(error) = &result.start_error {
            println!(
                "{}",
                format!("⚠ Run {} was created but failed to start: {}", result.run.id, error).yellow()
            );
        }
        result.run
    } else {
        runner.service().create_run(runner.user(), request).await?
    };

    let run = if start { settle(runner, run, json).await? } else { run };

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        println!("{}", format!("✓ Run {} {}", run.id, run.status).green());
        print_run(&run);
        if wait {
            results(runner, run.id).await?;
        }
    }
    Ok(())
}

async fn start_run(runner: &EmbeddedRunner, id: RunId, wait: bool) -> Result<()> {
    let run = runner.service().start_run(runner.user(), id).await?;
    let run = settle(runner, run, false).await?;
    println!("{}", format!("✓ Run {} {}", run.id, run.status).green());
    if let Some(error) = &run.error_message {
        println!("  Error: {}", error.red());
    }
    if wait {
        results(runner, run.id).await?;
    }
    Ok(())
}

/// Started runs execute inside this process; exiting before they are
/// terminal would abort them and leave their containers behind.
async fn settle(runner: &EmbeddedRunner, run: Run, quiet: bool) -> Result<Run> {
    if run.status.is_terminal() {
        return Ok(run);
    }
    if !quiet {
        eprintln!("{}", format!("Run {} is {}; waiting for it to finish...", run.id, run.status).dimmed());
    }
    runner.wait_for_run(run.id).await
}

async fn list(runner: &EmbeddedRunner, status: Option<RunStatus>, json: bool) -> Result<()> {
    let runs = runner.service().list_runs(runner.user(), status).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{}", "No runs found".yellow());
        return Ok(());
    }

    println!("{} runs found:", runs.len());
    println!("{:<8} {:<40} {:<10} {}", "ID", "TOOL", "STATUS", "CREATED");
    for run in &runs {
        println!(
            "{:<8} {:<40} {:<10} {}",
            run.id.to_string(),
            run.slug().bold(),
            status_label(run.status),
            run.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn show(runner: &EmbeddedRunner, id: RunId, json: bool) -> Result<()> {
    let detail = runner.service().get_run_detail(runner.user(), id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    print_run(&detail.run);
    if let Some(metadata) = &detail.tool_metadata {
        println!("{}", "Tool metadata:".bold());
        println!("{}", serde_json::to_string_pretty(metadata)?);
    }
    Ok(())
}

async fn delete(runner: &EmbeddedRunner, id: RunId) -> Result<()> {
    runner.service().delete_run(runner.user(), id).await?;
    println!("{}", format!("✓ Run {} deleted", id).green());
    Ok(())
}

async fn results(runner: &EmbeddedRunner, id: RunId) -> Result<()> {
    let files = runner.service().list_results(runner.user(), id).await?;
    if files.is_empty() {
        println!("{}", "No result files".yellow());
        return Ok(());
    }

    println!("{}", "Result files:".bold());
    for file in files {
        println!("  {:<40} {}", file.filename, file.mime_type.dimmed());
    }
    Ok(())
}

async fn result_file(
    runner: &EmbeddedRunner,
    id: RunId,
    filename: &str,
    output: Option<&Path>,
) -> Result<()> {
    let file = runner
        .service()
        .get_result_file(runner.user(), id, filename)
        .await?;

    match output {
        Some(path) => {
            std::fs::write(path, &file.content)
                .with_context(|| format!("Failed to write {:?}", path))?;
            println!(
                "{}",
                format!("✓ Wrote {} ({} bytes) to {}", file.file.filename, file.content.len(), path.display()).green()
            );
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&file.content)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn print_run(run: &Run) {
    println!("  ID: {}", run.id);
    println!("  Tool: {}", run.slug().bold());
    println!("  Status: {}", status_label(run.status));
    println!("  Created: {}", run.created_at);
    if let Some(started) = run.started_at {
        println!("  Started: {}", started);
    }
    if let Some(finished) = run.finished_at {
        println!("  Finished: {}", finished);
    }
    if let Some(error) = &run.error_message {
        println!("  Error: {}", error.red());
    }
}

fn status_label(status: RunStatus) -> colored::ColoredString {
    match status {
        RunStatus::Pending => status.as_str().dimmed(),
        RunStatus::Running => status.as_str().cyan(),
        RunStatus::Finished => status.as_str().green(),
        RunStatus::Errored => status.as_str().red(),
    }
}

/// Splits `KEY=VALUE` at the first `=`.
fn split_assignment(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("Expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Empty key in '{}'", raw);
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_parameters(raw: &[String]) -> Result<BTreeMap<String, serde_json::Value>> {
    raw.iter()
        .map(|item| {
            let (key, value) = split_assignment(item)?;
            let value = serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            Ok((key, value))
        })
        .collect()
}

fn parse_datasets(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let cwd = std::env::current_dir().context("Failed to read working directory")?;
    raw.iter()
        .map(|item| {
            let (name, path) = split_assignment(item)?;
            let path = PathBuf::from(path);
            let absolute = if path.is_absolute() { path } else { cwd.join(path) };
            Ok((name, absolute.to_string_lossy().into_owned()))
        })
        .collect()
}
