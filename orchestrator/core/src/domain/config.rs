// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Runner Configuration
//
// YAML configuration for an embedded tool runner:
// - Filesystem layout for run workspaces
// - Container engine connection
// - Storage backend selection (in-memory or PostgreSQL)
// - Caller identity and administrators
// - Execution and discovery tuning, logging

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::repository::{PostgresConfig, StorageBackend};
use crate::domain::run::{AdminSet, UserId};

pub const CONFIG_PATH_ENV: &str = "TOOLRUN_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Root for runner state (default `~/.toolrun`)
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    /// Where run workspaces are allocated (default `<base_path>/mounts`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<PathBuf>,

    #[serde(default)]
    pub runtime: RuntimeSettings,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub execution: ExecutionSettings,

    #[serde(default)]
    pub discovery: DiscoverySettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Docker socket; local defaults when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_socket_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    #[default]
    InMemory,
    Postgres { connection_string: String },
}

impl StorageConfig {
    pub fn backend(&self) -> StorageBackend {
        match self {
            StorageConfig::InMemory => StorageBackend::InMemory,
            StorageConfig::Postgres { connection_string } => StorageBackend::PostgreSQL(PostgresConfig {
                connection_string: connection_string.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_user_id")]
    pub user_id: String,

    #[serde(default)]
    pub admin_users: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            admin_users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Upper bound on how long a start request waits for the run to be accepted
    #[serde(default = "default_start_grace_ms")]
    pub start_grace_ms: u64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            start_grace_ms: default_start_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoverySettings {
    #[serde(default)]
    pub verbose: bool,

    /// Run a full discovery pass when the runner boots
    #[serde(default)]
    pub on_startup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `compact` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            mount_path: None,
            runtime: RuntimeSettings::default(),
            storage: StorageConfig::default(),
            identity: IdentityConfig::default(),
            execution: ExecutionSettings::default(),
            discovery: DiscoverySettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. TOOLRUN_CONFIG_PATH environment variable
    /// 2. ./toolrun-config.yaml (working directory)
    /// 3. ~/.toolrun/config.yaml (user home)
    /// 4. /etc/toolrun/config.yaml
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./toolrun-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".toolrun").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/toolrun/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(config_path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", config_path);
                Self::from_yaml_file(config_path)?
            }
            None => {
                tracing::debug!("No configuration file found in standard locations. Using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `TOOLRUN_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("TOOLRUN_BASE_PATH") {
            tracing::info!("Environment override: TOOLRUN_BASE_PATH={}", val);
            self.base_path = PathBuf::from(val);
        }
        if let Some(val) = lookup("TOOLRUN_MOUNT_PATH") {
            tracing::info!("Environment override: TOOLRUN_MOUNT_PATH={}", val);
            self.mount_path = Some(PathBuf::from(val));
        }
        if let Some(val) = lookup("TOOLRUN_DOCKER_SOCKET") {
            tracing::info!("Environment override: TOOLRUN_DOCKER_SOCKET={}", val);
            self.runtime.docker_socket_path = Some(val);
        }
        if let Some(val) = lookup("TOOLRUN_DATABASE_URL") {
            // connection strings carry credentials
            tracing::info!("Environment override: TOOLRUN_DATABASE_URL=<redacted>");
            self.storage = StorageConfig::Postgres { connection_string: val };
        }
        if let Some(val) = lookup("TOOLRUN_USER_ID") {
            tracing::info!("Environment override: TOOLRUN_USER_ID={}", val);
            self.identity.user_id = val;
        }
        if let Some(val) = lookup("TOOLRUN_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_path.as_os_str().is_empty() {
            anyhow::bail!("base_path cannot be empty");
        }

        if self.identity.user_id.trim().is_empty() {
            anyhow::bail!("identity.user_id cannot be empty");
        }

        if self.execution.start_grace_ms == 0 {
            anyhow::bail!("execution.start_grace_ms must be greater than zero");
        }

        if let StorageConfig::Postgres { connection_string } = &self.storage {
            if connection_string.trim().is_empty() {
                anyhow::bail!("storage.connection_string cannot be empty for the postgres backend");
            }
        }

        match self.logging.format.as_str() {
            "compact" | "json" => {}
            other => anyhow::bail!("Invalid logging.format '{}'. Supported: compact, json", other),
        }

        Ok(())
    }

    pub fn mount_path(&self) -> PathBuf {
        self.mount_path
            .clone()
            .unwrap_or_else(|| self.base_path.join("mounts"))
    }

    pub fn user_id(&self) -> UserId {
        UserId::new(self.identity.user_id.clone())
    }

    pub fn admins(&self) -> AdminSet {
        AdminSet::new(self.identity.admin_users.iter().cloned())
    }

    pub fn start_grace(&self) -> Duration {
        Duration::from_millis(self.execution.start_grace_ms)
    }
}

fn default_base_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".toolrun"))
        .unwrap_or_else(|| PathBuf::from(".toolrun"))
}

fn default_user_id() -> String {
    "local".to_string()
}

fn default_start_grace_ms() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}
