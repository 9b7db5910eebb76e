// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of `RunRepository`:
//! - **InMemoryRunRepository** - tokio `RwLock<HashMap>` with an atomic id
//!   sequence, for development and tests
//! - **PostgresRunRepository** - `sqlx` runtime queries against the `runs` table
//!
//! Both apply the same owner/admin predicate so either backend can be
//! swapped in from `RunnerConfig::storage`.

pub mod postgres_run;

pub use postgres_run::PostgresRunRepository;

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::repository::{RepositoryError, RunRepository, StorageBackend};
use crate::domain::run::{AdminSet, NewRun, Run, RunId, RunStatus, UserId};
use crate::infrastructure::db::Database;

#[derive(Clone)]
pub struct InMemoryRunRepository {
    runs: Arc<RwLock<HashMap<RunId, Run>>>,
    next_id: Arc<AtomicI64>,
    admins: AdminSet,
}

impl InMemoryRunRepository {
    pub fn new(admins: AdminSet) -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
            admins,
        }
    }
}

impl Default for InMemoryRunRepository {
    fn default() -> Self {
        Self::new(AdminSet::default())
    }
}

fn not_found(id: RunId) -> RepositoryError {
    RepositoryError::NotFound(format!("run {}", id))
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn create_run(&self, new: NewRun) -> Result<Run, RepositoryError> {
        let id = RunId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let run = Run::from_new(id, new, Utc::now());
        self.runs.write().await.insert(id, run.clone());
        Ok(run)
    }

    async fn get_run(&self, id: RunId, user: &UserId) -> Result<Option<Run>, RepositoryError> {
        let runs = self.runs.read().await;
        Ok(runs
            .get(&id)
            .filter(|run| run.is_visible_to(user, &self.admins))
            .cloned())
    }

    async fn list_runs(&self, user: &UserId, status: Option<RunStatus>) -> Result<Vec<Run>, RepositoryError> {
        let runs = self.runs.read().await;
        let mut visible: Vec<Run> = runs
            .values()
            .filter(|run| run.is_visible_to(user, &self.admins))
            .filter(|run| status.map_or(true, |s| run.status == s))
            .cloned()
            .collect();
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(visible)
    }

    async fn delete_run(&self, id: RunId, user: &UserId) -> Result<(), RepositoryError> {
        let mut runs = self.runs.write().await;
        match runs.get(&id) {
            Some(run) if run.is_visible_to(user, &self.admins) => {
                runs.remove(&id);
                Ok(())
            }
            _ => Err(not_found(id)),
        }
    }

    async fn transition_to_running(&self, id: RunId, user: &UserId) -> Result<(), RepositoryError> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(&id)
            .filter(|run| run.is_visible_to(user, &self.admins))
            .ok_or_else(|| not_found(id))?;
        if run.status != RunStatus::Pending {
            return Err(RepositoryError::InvalidTransition(format!(
                "run {} is {}, expected pending",
                id, run.status
            )));
        }
        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        Ok(())
    }

    async fn transition_to_finished(&self, id: RunId) -> Result<(), RepositoryError> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&id).ok_or_else(|| not_found(id))?;
        if run.status.is_terminal() {
            return Err(RepositoryError::InvalidTransition(format!("run {} is already {}", id, run.status)));
        }
        run.status = RunStatus::Finished;
        run.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn transition_to_errored(&self, id: RunId, message: &str) -> Result<(), RepositoryError> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&id).ok_or_else(|| not_found(id))?;
        if run.status.is_terminal() {
            return Err(RepositoryError::InvalidTransition(format!("run {} is already {}", id, run.status)));
        }
        run.status = RunStatus::Errored;
        run.finished_at = Some(Utc::now());
        run.has_errored = true;
        run.error_message = Some(message.to_string());
        Ok(())
    }

    async fn set_tool_metadata(&self, id: RunId, metadata: &str) -> Result<(), RepositoryError> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&id).ok_or_else(|| not_found(id))?;
        run.tool_metadata = Some(metadata.to_string());
        Ok(())
    }
}

/// Build the run repository for the configured backend.
pub async fn build_run_repository(
    backend: &StorageBackend,
    admins: AdminSet,
) -> anyhow::Result<Arc<dyn RunRepository>> {
    match backend {
        StorageBackend::InMemory => {
            tracing::info!("Using in-memory run repository");
            Ok(Arc::new(InMemoryRunRepository::new(admins)))
        }
        StorageBackend::PostgreSQL(config) => {
            tracing::info!("Using PostgreSQL run repository");
            let db = Database::new(&config.connection_string).await?;
            let repo = PostgresRunRepository::new(db.get_pool().clone(), admins);
            repo.ensure_schema().await?;
            Ok(Arc::new(repo))
        }
    }
}
