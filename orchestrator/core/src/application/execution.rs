// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Run Execution Engine
//!
//! Drives one `Run` from `pending` to a terminal state:
//!
//! 1. resolve the run mode (command override, `gotap` shim, or image default)
//! 2. create and start the container; persist `running` once the start succeeded
//! 3. wait for exit, collect and demultiplex logs, remove the container
//! 4. write `STDOUT.log`/`STDERR.log` and pick up `_metadata.json` from `/out`
//! 5. persist `finished` (exit 0) or `errored`
//!
//! Every failure after the run was handed to the engine ends in exactly one
//! `errored` transition carrying the cause. A process crash mid-run leaves
//! the run in its last persisted state; nothing reconciles it on restart.

use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::spec_probe::detect_shim;
use crate::domain::events::RunEvent;
use crate::domain::repository::{RepositoryError, RunRepository};
use crate::domain::result_file::{METADATA_FILE, STDERR_LOG, STDOUT_LOG};
use crate::domain::run::{Run, IN_MOUNT, OUT_MOUNT};
use crate::domain::runtime::{
    collect_logs, BindMount, ContainerId, ContainerLogs, ContainerRuntime, ContainerSpec, RuntimeConnector,
    RuntimeError,
};
use crate::domain::tool_spec::SPEC_FILE_PATH;
use crate::infrastructure::event_bus::EventBus;

/// Per-run overrides.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Replaces the image command verbatim; skips shim detection
    pub cmd: Vec<String>,
    /// `KEY=VALUE` pairs
    pub env: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Command override or the image's own entrypoint
    Default,
    Shim { path: String },
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Default => "default",
            RunMode::Shim { .. } => "gotap",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub mode: RunMode,
    pub exit_code: i64,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("{mode} execution exited with status {code}")]
    NonZeroExit { mode: &'static str, code: i64 },
    #[error("failed to persist run state: {0}")]
    Repository(#[from] RepositoryError),
}

/// Shim invocation for `tool`.
pub fn shim_command(tool: &str) -> Vec<String> {
    vec![
        "run".to_string(),
        tool.to_string(),
        "--input-file".to_string(),
        format!("{}/inputs.json", IN_MOUNT),
        "--spec-file".to_string(),
        SPEC_FILE_PATH.to_string(),
        "--output-folder".to_string(),
        OUT_MOUNT.to_string(),
    ]
}

pub struct RunExecutor {
    connector: Arc<dyn RuntimeConnector>,
    repository: Arc<dyn RunRepository>,
    event_bus: EventBus,
    in_flight: Arc<watch::Sender<usize>>,
}

/// Decrements the in-flight count when a spawned execution ends, panics included.
struct InFlightGuard(Arc<watch::Sender<usize>>);

impl InFlightGuard {
    fn enter(counter: &Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl RunExecutor {
    pub fn new(
        connector: Arc<dyn RuntimeConnector>,
        repository: Arc<dyn RunRepository>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            connector,
            repository,
            event_bus,
            in_flight: Arc::new(watch::Sender::new(0)),
        }
    }

    /// Detached execution; the handle resolves when the run is terminal.
    pub fn spawn(self: &Arc<Self>, run: Run, options: RunOptions) -> JoinHandle<Result<RunOutcome, ExecutionError>> {
        let executor = Arc::clone(self);
        let guard = InFlightGuard::enter(&self.in_flight);
        tokio::spawn(async move {
            let _guard = guard;
            let result = executor.run_tool(&run, options).await;
            if let Err(e) = &result {
                error!("Run {} ({}) failed: {}", run.id, run.slug(), e);
            }
            result
        })
    }

    /// Executions spawned and not yet terminal.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Resolves once every spawned execution has ended. A process hosting
    /// the executor must drain it before the runtime shuts down, or
    /// in-flight containers are never removed.
    pub async fn drain(&self) {
        let mut idle = self.in_flight.subscribe();
        if idle.wait_for(|n| *n == 0).await.is_err() {
            debug!("In-flight counter dropped while draining");
        }
    }

    pub async fn run_tool(&self, run: &Run, options: RunOptions) -> Result<RunOutcome, ExecutionError> {
        let runtime = match self.connector.connect().await {
            Ok(runtime) => runtime,
            Err(e) => return Err(self.fail(run, e.into()).await),
        };

        let mode = match self.resolve_mode(runtime.as_ref(), run, &options).await {
            Ok(mode) => mode,
            Err(e) => return Err(self.fail(run, e.into()).await),
        };

        let mut spec = ContainerSpec::new(run.docker_image.clone())
            .with_env(options.env.clone())
            .with_mounts(BindMount::from_map(&run.mounts));
        if !options.cmd.is_empty() {
            spec = spec.with_cmd(options.cmd.iter().cloned());
        } else if let RunMode::Shim { path } = &mode {
            spec = spec.with_entrypoint([path.clone()]).with_cmd(shim_command(&run.name));
        }

        info!("Running tool {} with image {} ({} mode)", run.name, run.docker_image, mode.as_str());
        let container_id = match runtime.create(spec).await {
            Ok(id) => id,
            Err(e) => return Err(self.fail(run, e.into()).await),
        };
        debug!("Container {} created for run {}", container_id, run.id);

        let supervised = self.supervise(runtime.as_ref(), run, &container_id).await;

        if let Err(e) = runtime.remove(&container_id).await {
            warn!("Failed to remove container {} of run {}: {}", container_id, run.id, e);
        }

        let (exit_code, logs) = match supervised {
            Ok(result) => result,
            Err(e) => return Err(self.fail(run, e).await),
        };

        if let Some(out_dir) = run.output_dir() {
            write_logs(&out_dir, &logs).await;
            self.record_metadata(run, &out_dir).await;
        }

        if exit_code != 0 {
            let err = ExecutionError::NonZeroExit {
                mode: mode.as_str(),
                code: exit_code,
            };
            return Err(self.fail(run, err).await);
        }

        if let Err(e) = self.repository.transition_to_finished(run.id).await {
            error!("Failed to mark run {} as finished: {}", run.id, e);
            return Err(self.fail(run, e.into()).await);
        }
        info!("Run {} finished", run.id);
        self.event_bus.publish_run_event(RunEvent::RunFinished {
            run_id: run.id,
            exit_code,
            finished_at: Utc::now(),
        });

        Ok(RunOutcome { mode, exit_code })
    }

    async fn resolve_mode(
        &self,
        runtime: &dyn ContainerRuntime,
        run: &Run,
        options: &RunOptions,
    ) -> Result<RunMode, RuntimeError> {
        if !options.cmd.is_empty() {
            debug!("Run {} uses custom command {:?}", run.id, options.cmd);
            return Ok(RunMode::Default);
        }
        Ok(match detect_shim(runtime, &run.docker_image).await? {
            Some(path) => {
                debug!("Detected {} shim at {} in {}", crate::application::spec_probe::SHIM_BINARY, path, run.docker_image);
                RunMode::Shim { path }
            }
            None => RunMode::Default,
        })
    }

    /// Start, mark running, wait, and collect logs. The caller removes the
    /// container whatever this returns.
    async fn supervise(
        &self,
        runtime: &dyn ContainerRuntime,
        run: &Run,
        container_id: &ContainerId,
    ) -> Result<(i64, ContainerLogs), ExecutionError> {
        runtime.start(container_id).await?;

        self.repository.transition_to_running(run.id, &run.user_id).await?;
        info!("Run {} is running in container {}", run.id, container_id);
        self.event_bus.publish_run_event(RunEvent::RunStarted {
            run_id: run.id,
            container_id: container_id.as_str().to_string(),
            started_at: Utc::now(),
        });

        let exit_code = runtime.wait(container_id).await?;
        debug!("Container {} of run {} exited with {}", container_id, run.id, exit_code);

        let logs = collect_logs(runtime.logs(container_id)).await?;
        Ok((exit_code, logs))
    }

    async fn record_metadata(&self, run: &Run, out_dir: &Path) {
        let path = out_dir.join(METADATA_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!("Failed reading tool metadata at {:?}: {}", path, e);
                return;
            }
        };

        if serde_json::from_slice::<serde_json::Value>(&bytes).is_err() {
            warn!("Invalid tool metadata JSON at {:?}", path);
            return;
        }

        let metadata = String::from_utf8_lossy(&bytes).trim().to_string();
        match self.repository.set_tool_metadata(run.id, &metadata).await {
            Ok(()) => self.event_bus.publish_run_event(RunEvent::MetadataRecorded {
                run_id: run.id,
                recorded_at: Utc::now(),
            }),
            Err(e) => warn!("Failed to persist tool metadata for run {}: {}", run.id, e),
        }
    }

    /// Records the terminal `errored` state and hands the cause back. The
    /// event goes out even when storage refused the transition, so waiters
    /// never block on a run the engine has given up on.
    async fn fail(&self, run: &Run, err: ExecutionError) -> ExecutionError {
        let message = format!(
            "the execution of the tool ({}) container ({}) errored unexpectedly: {}",
            run.name, run.docker_image, err
        );
        match self.repository.transition_to_errored(run.id, &message).await {
            Ok(()) => info!("Run {} errored: {}", run.id, err),
            Err(e) => error!("Failed to mark run {} as errored: {}", run.id, e),
        }
        self.event_bus.publish_run_event(RunEvent::RunErrored {
            run_id: run.id,
            error: message,
            errored_at: Utc::now(),
        });
        err
    }
}

async fn write_logs(out_dir: &Path, logs: &ContainerLogs) {
    for (name, content) in [(STDOUT_LOG, &logs.stdout), (STDERR_LOG, &logs.stderr)] {
        let path = out_dir.join(name);
        if let Err(e) = tokio::fs::write(&path, content).await {
            warn!("Failed to write {:?}: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shim_command_points_at_mounts() {
        assert_eq!(
            shim_command("echo-tool"),
            vec![
                "run",
                "echo-tool",
                "--input-file",
                "/in/inputs.json",
                "--spec-file",
                "/src/tool.yml",
                "--output-folder",
                "/out"
            ]
        );
    }

    #[test]
    fn test_exit_error_names_mode_and_code() {
        let err = ExecutionError::NonZeroExit {
            mode: RunMode::Shim { path: "/usr/bin/gotap".to_string() }.as_str(),
            code: 3,
        };
        assert_eq!(err.to_string(), "gotap execution exited with status 3");
    }
}
