// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Run Repository Interface
//!
//! Persistence contract for the `Run` aggregate, implemented in
//! `crate::infrastructure::repositories` by `InMemoryRunRepository` and
//! `PostgresRunRepository`.
//!
//! State transitions are conditional updates. The owner/admin predicate on
//! `get_run`, `delete_run` and `transition_to_running` is the authorization
//! boundary; there is no separate lock. Terminal transitions only apply to
//! runs that are not already terminal, so a run records exactly one outcome.

use async_trait::async_trait;

use crate::domain::run::{NewRun, Run, RunId, RunStatus, UserId};

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
}

#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Persist a new run in `pending` and return it with its assigned id.
    async fn create_run(&self, new: NewRun) -> Result<Run, RepositoryError>;

    /// `None` when the run does not exist or is not visible to `user`.
    async fn get_run(&self, id: RunId, user: &UserId) -> Result<Option<Run>, RepositoryError>;

    /// Runs visible to `user`, newest first, optionally filtered by status.
    async fn list_runs(&self, user: &UserId, status: Option<RunStatus>) -> Result<Vec<Run>, RepositoryError>;

    async fn delete_run(&self, id: RunId, user: &UserId) -> Result<(), RepositoryError>;

    /// `pending -> running`, stamping `started_at`.
    async fn transition_to_running(&self, id: RunId, user: &UserId) -> Result<(), RepositoryError>;

    /// `-> finished`, stamping `finished_at`.
    async fn transition_to_finished(&self, id: RunId) -> Result<(), RepositoryError>;

    /// `-> errored`, stamping `finished_at` and recording `message`.
    async fn transition_to_errored(&self, id: RunId, message: &str) -> Result<(), RepositoryError>;

    async fn set_tool_metadata(&self, id: RunId, metadata: &str) -> Result<(), RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
