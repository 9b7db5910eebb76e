// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # toolrun CLI
//!
//! The `toolrun` binary discovers containerized tools in the local image
//! store and runs them against validated inputs.
//!
//! ## Commands
//!
//! - `toolrun tools discover|list|show` - Tool catalog
//! - `toolrun runs create|start|list|show|delete|results|result` - Run lifecycle
//! - `toolrun config show|validate|generate` - Configuration management
//!
//! Services are wired in-process for every invocation; see `embedded`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod commands;
mod embedded;

use commands::{ConfigCommand, RunsCommand, ToolsCommand};

/// toolrun - Run containerized tools against validated inputs
#[derive(Parser)]
#[command(name = "toolrun")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "TOOLRUN_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Act as this user instead of identity.user_id
    #[arg(long, global = true, env = "TOOLRUN_USER_ID", value_name = "USER")]
    user: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "TOOLRUN_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Log output format (compact, json)
    #[arg(long, global = true, env = "TOOLRUN_LOG_FORMAT", default_value = "compact")]
    log_format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Tool discovery and inspection
    #[command(name = "tools")]
    Tools {
        #[command(subcommand)]
        command: ToolsCommand,
    },

    /// Run management
    #[command(name = "runs")]
    Runs {
        #[command(subcommand)]
        command: RunsCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    init_logging(&cli.log_level, &cli.log_format)?;

    match cli.command {
        Some(Commands::Tools { command }) => {
            commands::tools::handle_command(command, cli.config, cli.user).await
        }
        Some(Commands::Runs { command }) => {
            commands::runs::handle_command(command, cli.config, cli.user).await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        other => anyhow::bail!("Unsupported log format '{}'. Supported: compact, json", other),
    }

    Ok(())
}
