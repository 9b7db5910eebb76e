// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::runtime::{
    ContainerId, ContainerRuntime, ContainerSpec, ImageSummary, LogChunk, LogStream, RuntimeConnector,
    RuntimeError,
};
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, ListImagesOptionsBuilder, LogsOptionsBuilder, RemoveContainerOptionsBuilder,
    StartContainerOptions, WaitContainerOptionsBuilder,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::StreamExt;
use std::sync::Arc;
use tracing::debug;

const DOCKER_TIMEOUT_SECS: u64 = 120;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(socket_path: Option<&str>) -> Result<Self, RuntimeError> {
        // Connect to Docker daemon (custom socket or auto-detect)
        let docker = if let Some(path) = socket_path {
            Docker::connect_with_socket(path, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION).map_err(|e| {
                RuntimeError::Connection(format!(
                    "Failed to connect to Docker at {}: {}\n\n\
                     Ensure Docker is running and the socket path is correct.",
                    path, e
                ))
            })?
        } else {
            Docker::connect_with_local_defaults().map_err(|e| {
                RuntimeError::Connection(format!(
                    "Failed to connect to Docker: {}\n\n\
                     Common causes:\n\
                     - Docker daemon not running (check: docker ps)\n\
                     - Permission denied accessing Docker socket\n\
                     - On Linux: Current user not in 'docker' group",
                    e
                ))
            })?
        };

        Ok(Self { docker })
    }

    /// Verify Docker daemon is accessible
    pub async fn healthcheck(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await.map_err(|e| {
            RuntimeError::Connection(format!(
                "Cannot connect to Docker daemon: {}\n\n\
                 Verify with: docker ps",
                e
            ))
        })?;
        Ok(())
    }
}

fn is_not_found_error(error: &BollardError) -> bool {
    matches!(error, BollardError::DockerResponseServerError { status_code: 404, .. })
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: ContainerSpec) -> Result<ContainerId, RuntimeError> {
        let binds: Vec<String> = spec.mounts.iter().map(|m| m.to_bind_string()).collect();

        let config = ContainerCreateBody {
            image: Some(spec.image.clone()),
            entrypoint: spec.entrypoint,
            cmd: spec.cmd,
            env: if spec.env.is_empty() { None } else { Some(spec.env) },
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(HostConfig {
                binds: if binds.is_empty() { None } else { Some(binds) },
                ..HostConfig::default()
            }),
            ..ContainerCreateBody::default()
        };

        let res = self
            .docker
            .create_container(None::<CreateContainerOptions>, config)
            .await
            .map_err(|e| RuntimeError::CreateFailed(format!("{}: {}", spec.image, e)))?;

        let id = ContainerId::new(res.id);
        debug!("Created container {} from {}", id, spec.image);
        Ok(id)
    }

    async fn start(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id.as_str(), None::<StartContainerOptions>)
            .await
            .map_err(|e| RuntimeError::StartFailed(e.to_string()))
    }

    async fn wait(&self, id: &ContainerId) -> Result<i64, RuntimeError> {
        let options = WaitContainerOptionsBuilder::new().condition("not-running").build();
        let mut stream = self.docker.wait_container(id.as_str(), Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error carrying the code
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(RuntimeError::WaitFailed(e.to_string())),
            None => Err(RuntimeError::WaitFailed(format!(
                "wait stream for container {} ended without a status",
                id
            ))),
        }
    }

    fn logs(&self, id: &ContainerId) -> LogStream {
        let options = LogsOptionsBuilder::new()
            .stdout(true)
            .stderr(true)
            .follow(false)
            .build();

        self.docker
            .logs(id.as_str(), Some(options))
            .map(|frame| match frame {
                Ok(LogOutput::StdOut { message }) => Ok(LogChunk::Stdout(message)),
                Ok(LogOutput::StdErr { message }) => Ok(LogChunk::Stderr(message)),
                Ok(LogOutput::StdIn { message }) | Ok(LogOutput::Console { message }) => {
                    Ok(LogChunk::Other(message))
                }
                Err(e) => Err(RuntimeError::LogsFailed(e.to_string())),
            })
            .boxed()
    }

    async fn remove(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptionsBuilder::new().force(true).v(true).build();

        match self.docker.remove_container(id.as_str(), Some(options)).await {
            Ok(()) => {
                debug!("Removed container {}", id);
                Ok(())
            }
            Err(e) if is_not_found_error(&e) => Ok(()),
            Err(e) => Err(RuntimeError::RemoveFailed(e.to_string())),
        }
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>, RuntimeError> {
        let options = ListImagesOptionsBuilder::new().all(false).build();

        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(|e| RuntimeError::ListImagesFailed(e.to_string()))?;

        Ok(images
            .into_iter()
            .map(|image| ImageSummary {
                id: image.id,
                repo_tags: image.repo_tags,
            })
            .collect())
    }
}

/// Opens a fresh Docker client per call and pings it, so an unreachable
/// engine surfaces as `RuntimeError::Connection`.
#[derive(Debug, Clone, Default)]
pub struct DockerConnector {
    socket_path: Option<String>,
}

impl DockerConnector {
    pub fn new(socket_path: Option<String>) -> Self {
        Self { socket_path }
    }
}

#[async_trait]
impl RuntimeConnector for DockerConnector {
    async fn connect(&self) -> Result<Arc<dyn ContainerRuntime>, RuntimeError> {
        let runtime = DockerRuntime::new(self.socket_path.as_deref())?;
        runtime.healthcheck().await?;
        Ok(Arc::new(runtime))
    }
}
