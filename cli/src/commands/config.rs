// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use toolrun_core::domain::config::{RunnerConfig, StorageConfig, CONFIG_PATH_ENV};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective configuration as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file holding the defaults
    Generate {
        /// Output path (default: ./toolrun-config.yaml)
        #[arg(short, long, default_value = "./toolrun-config.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output } => generate(output).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool, yaml: bool) -> Result<()> {
    let config = RunnerConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. {}: {}",
            CONFIG_PATH_ENV,
            std::env::var(CONFIG_PATH_ENV)
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./toolrun-config.yaml");
        println!("  4. ~/.toolrun/config.yaml");
        println!("  5. /etc/toolrun/config.yaml");
        println!();
    }

    if yaml {
        print!("{}", config.to_yaml_string()?);
        return Ok(());
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Paths:".bold());
    println!("  Base: {}", config.base_path.display());
    println!("  Mounts: {}", config.mount_path().display());
    println!();

    println!("{}", "Container Runtime:".bold());
    println!(
        "  Docker socket: {}",
        config
            .runtime
            .docker_socket_path
            .as_deref()
            .unwrap_or("(auto-detect)")
    );
    println!();

    println!("{}", "Storage:".bold());
    match &config.storage {
        StorageConfig::InMemory => println!("  Backend: in-memory (runs are lost on exit)"),
        StorageConfig::Postgres { .. } => println!("  Backend: postgres"),
    }
    println!();

    println!("{}", "Identity:".bold());
    println!("  User: {}", config.identity.user_id);
    if config.identity.admin_users.is_empty() {
        println!("  Admins: {}", "(none)".dimmed());
    } else {
        println!("  Admins: {}", config.identity.admin_users.join(", "));
    }
    println!();

    println!("{}", "Execution:".bold());
    println!("  Start grace: {}ms", config.execution.start_grace_ms);
    println!(
        "  Discovery: on_startup={} verbose={}",
        config.discovery.on_startup, config.discovery.verbose
    );
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = RunnerConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf) -> Result<()> {
    let sample = RunnerConfig::default().to_yaml_string()?;

    tokio::fs::write(&output, sample)
        .await
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
