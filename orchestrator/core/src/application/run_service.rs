// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Tool Run Service
//!
//! The seam protocol adapters (REST, MCP, the CLI) call into. Composes the
//! tool cache, input validation, run workspaces, the execution engine and
//! the run repository behind a caller identity check. Ownership is enforced
//! by the repository's predicates, not here.
//!
//! Every error carries an [`ErrorKind`] so adapters can map it to their own
//! response codes without matching on variants.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::discovery::{DiscoveryError, ToolDiscovery};
use crate::application::execution::{RunExecutor, RunOptions};
use crate::application::tool_cache::ToolSpecCache;
use crate::application::workspace::{RunWorkspace, WorkspaceError};
use crate::domain::repository::{RepositoryError, RunRepository};
use crate::domain::result_file::{list_result_files, read_result_file, ResultFile, ResultFileContent, ResultFileError};
use crate::domain::run::{NewRun, Run, RunId, RunStatus, UserId};
use crate::domain::runtime::{RuntimeConnector, RuntimeError};
use crate::domain::tool_spec::{tool_slug, ToolInput, ToolSpec};
use crate::domain::validation::{validate_inputs, ValidationErrors};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    Validation,
    NotFound,
    Internal,
}

/// Field-level validation failure, surfaced verbatim to API consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub message: String,
    pub errors: ValidationErrors,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("user id is required")]
    Unauthorized,
    #[error("{}", .0.message)]
    Validation(ValidationFailure),
    #[error("run {id} is {status}; only pending runs can be started")]
    NotStartable { id: RunId, status: RunStatus },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("container runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("persistence error: {0}")]
    Persistence(RepositoryError),
    #[error(transparent)]
    Workspace(WorkspaceError),
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Unauthorized => ErrorKind::Unauthorized,
            ServiceError::Validation(_) | ServiceError::NotStartable { .. } => ErrorKind::Validation,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Runtime(_)
            | ServiceError::Persistence(_)
            | ServiceError::Workspace(_)
            | ServiceError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn validation_failure(&self) -> Option<&ValidationFailure> {
        match self {
            ServiceError::Validation(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => ServiceError::NotFound(what),
            other => ServiceError::Persistence(other),
        }
    }
}

impl From<WorkspaceError> for ServiceError {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::DatasetMissing { .. } => ServiceError::NotFound(err.to_string()),
            other => ServiceError::Workspace(other),
        }
    }
}

impl From<ResultFileError> for ServiceError {
    fn from(err: ResultFileError) -> Self {
        match err {
            ResultFileError::NotFound(name) => ServiceError::NotFound(format!("result file {}", name)),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<DiscoveryError> for ServiceError {
    fn from(err: DiscoveryError) -> Self {
        if err.is_not_found() {
            return ServiceError::NotFound(err.to_string());
        }
        match err {
            DiscoveryError::Runtime(e) => ServiceError::Runtime(e),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateRunRequest {
    pub tool_name: String,
    pub docker_image: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// dataset name -> host path
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl CreateRunRequest {
    pub fn slug(&self) -> String {
        tool_slug(&self.docker_image, &self.tool_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAndStartResult {
    pub run: Run,
    pub start_failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDetail {
    pub run: Run,
    /// The tool's `_metadata.json`, parsed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_metadata: Option<serde_json::Value>,
}

pub struct ToolRunService {
    cache: Arc<ToolSpecCache>,
    discovery: ToolDiscovery,
    executor: Arc<RunExecutor>,
    repository: Arc<dyn RunRepository>,
    workspace: RunWorkspace,
    event_bus: EventBus,
    start_grace: Duration,
}

fn require_user(user: &UserId) -> Result<(), ServiceError> {
    if user.is_empty() {
        return Err(ServiceError::Unauthorized);
    }
    Ok(())
}

async fn blocking<T, F>(f: F) -> Result<T, ServiceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ResultFileError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServiceError::Internal(format!("blocking task failed: {}", e)))?
        .map_err(ServiceError::from)
}

impl ToolRunService {
    pub fn new(
        connector: Arc<dyn RuntimeConnector>,
        repository: Arc<dyn RunRepository>,
        cache: Arc<ToolSpecCache>,
        workspace: RunWorkspace,
        event_bus: EventBus,
        start_grace: Duration,
    ) -> Self {
        let discovery = ToolDiscovery::new(Arc::clone(&connector), Arc::clone(&cache));
        let executor = Arc::new(RunExecutor::new(connector, Arc::clone(&repository), event_bus.clone()));
        Self {
            cache,
            discovery,
            executor,
            repository,
            workspace,
            event_bus,
            start_grace,
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn executor(&self) -> &Arc<RunExecutor> {
        &self.executor
    }

    pub async fn discover_tools(&self, verbose: bool, cancel: &CancellationToken) -> Result<Vec<String>, ServiceError> {
        Ok(self.discovery.discover_all(verbose, cancel).await?)
    }

    /// Whether a full discovery pass has completed.
    pub fn tools_discovered(&self) -> bool {
        self.cache.is_initialised()
    }

    pub fn list_tool_specs(&self, filter: &str) -> Vec<ToolSpec> {
        self.cache.list_tool_specs(filter)
    }

    /// Cache lookup only.
    pub fn get_tool_spec(&self, slug: &str) -> Result<ToolSpec, ServiceError> {
        self.cache
            .get_tool_spec(slug)
            .ok_or_else(|| ServiceError::NotFound(format!("tool {}", slug)))
    }

    /// Cache lookup, probing the image on a miss.
    pub async fn resolve_tool_spec(&self, slug: &str) -> Result<ToolSpec, ServiceError> {
        Ok(self.discovery.load_tool_spec(slug).await?)
    }

    /// Validates the payload against the cached spec and persists a pending run.
    pub async fn create_run(&self, user: &UserId, request: CreateRunRequest) -> Result<Run, ServiceError> {
        require_user(user)?;
        let slug = request.slug();
        let spec = self.get_tool_spec(&slug)?;

        let input = ToolInput {
            parameters: request.parameters,
            datasets: request.data,
        };
        let validated = validate_inputs(&spec, &input).map_err(|errors| {
            ServiceError::Validation(ValidationFailure {
                message: format!("the provided payload is invalid for the tool {}", slug),
                errors,
            })
        })?;

        let prepared = self.workspace.prepare(&spec.name, &validated).await?;

        let parameters = validated
            .parameters
            .iter()
            .map(|(name, value)| Ok((name.clone(), serde_json::to_value(value)?)))
            .collect::<Result<BTreeMap<_, _>, serde_json::Error>>()
            .map_err(|e| ServiceError::Internal(e.to_string()))?;

        let new = NewRun {
            name: spec.name.clone(),
            title: spec.title.clone(),
            description: spec.description.clone(),
            docker_image: request.docker_image,
            parameters,
            data: prepared.data,
            mounts: prepared.mounts,
            user_id: user.clone(),
        };

        match self.repository.create_run(new).await {
            Ok(run) => {
                info!("Created run {} for {}", run.id, slug);
                Ok(run)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&prepared.root).await {
                    warn!("Failed to clean up workspace {:?}: {}", prepared.root, cleanup);
                }
                Err(e.into())
            }
        }
    }

    /// Launches execution in the background and reports the run as observed
    /// once the engine has accepted it, or after the start grace elapsed.
    pub async fn start_run(&self, user: &UserId, id: RunId) -> Result<Run, ServiceError> {
        require_user(user)?;
        let run = self.fetch_run(user, id).await?;
        if run.status != RunStatus::Pending {
            return Err(ServiceError::NotStartable { id, status: run.status });
        }

        let mut events = self.event_bus.subscribe_run(id);
        self.executor.spawn(run, RunOptions::default());

        match tokio::time::timeout(self.start_grace, events.recv()).await {
            Ok(Ok(event)) => debug!("Run {} accepted: {:?}", id, event.resulting_status()),
            Ok(Err(e)) => debug!("Lost events for run {}: {}", id, e),
            Err(_) => debug!("Run {} not accepted within {:?}", id, self.start_grace),
        }

        self.fetch_run(user, id).await
    }

    pub async fn create_and_start_run(
        &self,
        user: &UserId,
        request: CreateRunRequest,
    ) -> Result<CreateAndStartResult, ServiceError> {
        let run = self.create_run(user, request).await?;
        match self.start_run(user, run.id).await {
            Ok(started) => Ok(CreateAndStartResult {
                run: started,
                start_failed: false,
                start_error: None,
            }),
            Err(e) => {
                warn!("Run {} was created but failed to start: {}", run.id, e);
                Ok(CreateAndStartResult {
                    run,
                    start_failed: true,
                    start_error: Some(e.to_string()),
                })
            }
        }
    }

    pub async fn get_run_detail(&self, user: &UserId, id: RunId) -> Result<RunDetail, ServiceError> {
        require_user(user)?;
        let run = self.fetch_run(user, id).await?;
        let tool_metadata = run.tool_metadata.as_deref().and_then(|raw| {
            serde_json::from_str(raw)
                .map_err(|e| warn!("Ignoring unparseable metadata of run {}: {}", id, e))
                .ok()
        });
        Ok(RunDetail { run, tool_metadata })
    }

    pub async fn list_runs(&self, user: &UserId, status: Option<RunStatus>) -> Result<Vec<Run>, ServiceError> {
        require_user(user)?;
        Ok(self.repository.list_runs(user, status).await?)
    }

    /// Deletes the run record and its workspace directory.
    pub async fn delete_run(&self, user: &UserId, id: RunId) -> Result<(), ServiceError> {
        require_user(user)?;
        let run = self.fetch_run(user, id).await?;
        self.repository.delete_run(id, user).await?;
        if self.workspace.remove(&run).await? {
            info!("Deleted run {} and its workspace", id);
        } else {
            info!("Deleted run {}", id);
        }
        Ok(())
    }

    pub async fn list_results(&self, user: &UserId, id: RunId) -> Result<Vec<ResultFile>, ServiceError> {
        let detail = self.get_run_detail(user, id).await?;
        let Some(out_dir) = detail.run.output_dir() else {
            return Ok(Vec::new());
        };
        blocking(move || list_result_files(&out_dir)).await
    }

    pub async fn get_result_file(&self, user: &UserId, id: RunId, filename: &str) -> Result<ResultFileContent, ServiceError> {
        let detail = self.get_run_detail(user, id).await?;
        let out_dir = detail
            .run
            .output_dir()
            .ok_or_else(|| ServiceError::NotFound(format!("result file {}", filename)))?;
        let filename = filename.to_string();
        blocking(move || read_result_file(&out_dir, &filename)).await
    }

    async fn fetch_run(&self, user: &UserId, id: RunId) -> Result<Run, ServiceError> {
        self.repository
            .get_run(id, user)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("run {}", id)))
    }
}
