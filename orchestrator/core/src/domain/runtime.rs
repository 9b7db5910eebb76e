// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Container Runtime Port
//!
//! The capability surface the core needs from a container engine: create,
//! start, wait, read logs, remove, and list images. Implemented by
//! `crate::infrastructure::runtime::DockerRuntime`; tests substitute a
//! scripted fake.
//!
//! Discovery probes must not share a connection, so callers obtain runtimes
//! through a [`RuntimeConnector`] rather than holding a single client.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Docker ids are 64 hex chars; the short form is what `docker ps` shows
        f.write_str(self.0.get(..12).unwrap_or(&self.0))
    }
}

/// Host path bound into the container at `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    pub source: String,
    pub target: String,
}

impl BindMount {
    /// Mounts derived from a run's `container path -> host path` map.
    pub fn from_map(mounts: &BTreeMap<String, String>) -> Vec<BindMount> {
        mounts
            .iter()
            .map(|(target, source)| BindMount {
                source: source.clone(),
                target: target.clone(),
            })
            .collect()
    }

    pub fn to_bind_string(&self) -> String {
        format!("{}:{}", self.source, self.target)
    }
}

/// Everything needed to create one container. `None` for entrypoint or cmd
/// keeps the image's own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub env: Vec<String>,
    pub mounts: Vec<BindMount>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_entrypoint<I, S>(mut self, entrypoint: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entrypoint = Some(entrypoint.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = Some(cmd.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_mounts(mut self, mounts: Vec<BindMount>) -> Self {
        self.mounts = mounts;
        self
    }
}

/// One frame of a container's multiplexed log stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogChunk {
    Stdout(Bytes),
    Stderr(Bytes),
    /// stdin echo or console frames; ignored when demultiplexing
    Other(Bytes),
}

pub type LogStream = BoxStream<'static, Result<LogChunk, RuntimeError>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub id: String,
    pub repo_tags: Vec<String>,
}

impl ImageSummary {
    /// The reference used to address this image; untagged images have none.
    pub fn reference(&self) -> Option<&str> {
        self.repo_tags
            .iter()
            .map(String::as_str)
            .find(|tag| !tag.is_empty() && *tag != "<none>:<none>")
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Failed to connect to container engine: {0}")]
    Connection(String),
    #[error("Failed to create container: {0}")]
    CreateFailed(String),
    #[error("Failed to start container: {0}")]
    StartFailed(String),
    #[error("Failed to wait for container: {0}")]
    WaitFailed(String),
    #[error("Failed to read container logs: {0}")]
    LogsFailed(String),
    #[error("Failed to remove container: {0}")]
    RemoveFailed(String),
    #[error("Failed to list images: {0}")]
    ListImagesFailed(String),
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create(&self, spec: ContainerSpec) -> Result<ContainerId, RuntimeError>;

    async fn start(&self, id: &ContainerId) -> Result<(), RuntimeError>;

    /// Blocks until the container stops and returns its exit code.
    async fn wait(&self, id: &ContainerId) -> Result<i64, RuntimeError>;

    /// Combined stdout/stderr of a stopped container, from the beginning.
    fn logs(&self, id: &ContainerId) -> LogStream;

    /// Force-removes the container and its anonymous volumes.
    async fn remove(&self, id: &ContainerId) -> Result<(), RuntimeError>;

    async fn list_images(&self) -> Result<Vec<ImageSummary>, RuntimeError>;
}

/// Opens independent runtime connections.
#[async_trait]
pub trait RuntimeConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ContainerRuntime>, RuntimeError>;
}

/// Demultiplexed container output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerLogs {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ContainerLogs {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Drains a log stream into separate stdout and stderr buffers. The stream
/// is dropped (and the underlying reader closed) before returning.
pub async fn collect_logs(mut stream: LogStream) -> Result<ContainerLogs, RuntimeError> {
    let mut logs = ContainerLogs::default();
    while let Some(chunk) = stream.next().await {
        match chunk? {
            LogChunk::Stdout(bytes) => logs.stdout.extend_from_slice(&bytes),
            LogChunk::Stderr(bytes) => logs.stderr.extend_from_slice(&bytes),
            LogChunk::Other(_) => {}
        }
    }
    Ok(logs)
}
