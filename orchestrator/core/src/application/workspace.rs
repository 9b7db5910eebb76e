// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Run Workspace
//!
//! Host directories backing a run's mounts:
//!
//! ```text
//! <mount_path>/<uuid>/
//!   in/   -> /in   datasets copied by basename (unique), plus inputs.json
//!   out/  -> /out  whatever the tool writes, plus STDOUT.log / STDERR.log
//! ```
//!
//! `inputs.json` is the document the `gotap` shim reads:
//! `{"<tool>": {"parameters": {...}, "data": {"<name>": "/in/<basename>"}}}`.

use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub use crate::domain::run::INPUTS_FILE;
use crate::domain::run::{Run, IN_MOUNT, OUT_MOUNT};
use crate::domain::validation::ValidatedInput;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("dataset '{name}' not found at {path:?}")]
    DatasetMissing { name: String, path: PathBuf },
    #[error("dataset '{name}' would overwrite /in/{basename}")]
    StagingConflict { name: String, basename: String },
    #[error("workspace I/O failed at {path:?}: {message}")]
    Io { path: PathBuf, message: String },
}

fn io_error(path: &Path, err: impl std::fmt::Display) -> WorkspaceError {
    WorkspaceError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedWorkspace {
    pub root: PathBuf,
    /// container path -> host path
    pub mounts: BTreeMap<String, String>,
    /// dataset name -> container path
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct RunWorkspace {
    mount_path: PathBuf,
}

impl RunWorkspace {
    pub fn new(mount_path: impl Into<PathBuf>) -> Self {
        Self {
            mount_path: mount_path.into(),
        }
    }

    pub fn mount_path(&self) -> &Path {
        &self.mount_path
    }

    /// Allocates a fresh workspace, stages datasets and writes `inputs.json`.
    /// A partially prepared workspace is removed before the error is returned.
    pub async fn prepare(&self, tool_name: &str, input: &ValidatedInput) -> Result<PreparedWorkspace, WorkspaceError> {
        let root = self.mount_path.join(Uuid::new_v4().to_string());
        match self.populate(&root, tool_name, input).await {
            Ok(prepared) => {
                debug!("Prepared workspace {:?} for {}", root, tool_name);
                Ok(prepared)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&root).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to clean up workspace {:?}: {}", root, cleanup);
                    }
                }
                Err(e)
            }
        }
    }

    async fn populate(&self, root: &Path, tool_name: &str, input: &ValidatedInput) -> Result<PreparedWorkspace, WorkspaceError> {
        let in_dir = root.join("in");
        let out_dir = root.join("out");
        for dir in [&in_dir, &out_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| io_error(dir, e))?;
        }

        let mut data = BTreeMap::new();
        let mut staged = HashSet::new();
        for (name, host_path) in &input.datasets {
            let source = PathBuf::from(host_path);
            if !tokio::fs::metadata(&source).await.map(|m| m.is_file()).unwrap_or(false) {
                return Err(WorkspaceError::DatasetMissing {
                    name: name.clone(),
                    path: source,
                });
            }
            let basename = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.clone());
            if basename == INPUTS_FILE || !staged.insert(basename.clone()) {
                return Err(WorkspaceError::StagingConflict {
                    name: name.clone(),
                    basename,
                });
            }
            let target = in_dir.join(&basename);
            tokio::fs::copy(&source, &target).await.map_err(|e| io_error(&target, e))?;
            data.insert(name.clone(), format!("{}/{}", IN_MOUNT, basename));
        }

        let inputs = json!({
            tool_name: {
                "parameters": input.parameters,
                "data": data,
            }
        });
        let inputs_path = in_dir.join(INPUTS_FILE);
        let body = serde_json::to_vec_pretty(&inputs).map_err(|e| io_error(&inputs_path, e))?;
        tokio::fs::write(&inputs_path, body).await.map_err(|e| io_error(&inputs_path, e))?;

        let mut mounts = BTreeMap::new();
        mounts.insert(IN_MOUNT.to_string(), in_dir.to_string_lossy().into_owned());
        mounts.insert(OUT_MOUNT.to_string(), out_dir.to_string_lossy().into_owned());

        Ok(PreparedWorkspace {
            root: root.to_path_buf(),
            mounts,
            data,
        })
    }

    /// Removes the directory holding the run's `/in` mount. Returns whether
    /// anything was deleted; runs without an input mount are left alone.
    pub async fn remove(&self, run: &Run) -> Result<bool, WorkspaceError> {
        let Some(root) = run.workspace_root() else {
            return Ok(false);
        };
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => {
                debug!("Removed workspace {:?} of run {}", root, run.id);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&root, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::run::{NewRun, RunId, UserId};
    use crate::domain::validation::ParameterValue;
    use chrono::Utc;
    use tempfile::TempDir;

    fn input_with_dataset(path: &Path) -> ValidatedInput {
        ValidatedInput {
            parameters: BTreeMap::from([("count".to_string(), ParameterValue::Integer(3))]),
            datasets: BTreeMap::from([("observations".to_string(), path.to_string_lossy().into_owned())]),
        }
    }

    #[tokio::test]
    async fn test_prepare_stages_datasets_and_inputs() {
        let tmp = TempDir::new().unwrap();
        let dataset = tmp.path().join("obs.csv");
        std::fs::write(&dataset, "a,b\n1,2\n").unwrap();
        let workspace = RunWorkspace::new(tmp.path().join("mounts"));

        let prepared = workspace.prepare("model", &input_with_dataset(&dataset)).await.unwrap();

        let in_dir = PathBuf::from(&prepared.mounts[IN_MOUNT]);
        assert!(PathBuf::from(&prepared.mounts[OUT_MOUNT]).is_dir());
        assert_eq!(std::fs::read_to_string(in_dir.join("obs.csv")).unwrap(), "a,b\n1,2\n");
        assert_eq!(prepared.data["observations"], "/in/obs.csv");

        let inputs: serde_json::Value =
            serde_json::from_slice(&std::fs::read(in_dir.join(INPUTS_FILE)).unwrap()).unwrap();
        assert_eq!(inputs["model"]["parameters"]["count"], 3);
        assert_eq!(inputs["model"]["data"]["observations"], "/in/obs.csv");
    }

    #[tokio::test]
    async fn test_missing_dataset_leaves_no_workspace() {
        let tmp = TempDir::new().unwrap();
        let mounts = tmp.path().join("mounts");
        let workspace = RunWorkspace::new(&mounts);

        let err = workspace
            .prepare("model", &input_with_dataset(&tmp.path().join("absent.csv")))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::DatasetMissing { .. }));
        assert_eq!(std::fs::read_dir(&mounts).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_colliding_datasets_are_never_overwritten() {
        let tmp = TempDir::new().unwrap();
        for dir in ["a", "b"] {
            std::fs::create_dir(tmp.path().join(dir)).unwrap();
            std::fs::write(tmp.path().join(dir).join("data.csv"), dir).unwrap();
        }
        std::fs::write(tmp.path().join("inputs.json"), "{}").unwrap();
        let mounts = tmp.path().join("mounts");
        let workspace = RunWorkspace::new(&mounts);

        let path = |rel: &str| tmp.path().join(rel).to_string_lossy().into_owned();
        let same_basename = ValidatedInput {
            parameters: BTreeMap::new(),
            datasets: BTreeMap::from([
                ("first".to_string(), path("a/data.csv")),
                ("second".to_string(), path("b/data.csv")),
            ]),
        };
        let err = workspace.prepare("model", &same_basename).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::StagingConflict { ref name, .. } if name == "second"));

        let reserved = ValidatedInput {
            parameters: BTreeMap::new(),
            datasets: BTreeMap::from([("config".to_string(), path("inputs.json"))]),
        };
        let err = workspace.prepare("model", &reserved).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::StagingConflict { .. }));
        assert_eq!(std::fs::read_dir(&mounts).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_remove_deletes_parent_of_input_mount_only() {
        let tmp = TempDir::new().unwrap();
        let workspace = RunWorkspace::new(tmp.path());
        let prepared = workspace.prepare("echo-tool", &ValidatedInput::default()).await.unwrap();

        let new = |mounts: BTreeMap<String, String>| NewRun {
            name: "echo-tool".to_string(),
            title: String::new(),
            description: String::new(),
            docker_image: "ubuntu".to_string(),
            parameters: BTreeMap::new(),
            data: BTreeMap::new(),
            mounts,
            user_id: UserId::new("alice"),
        };

        let without_mounts = Run::from_new(RunId(1), new(BTreeMap::new()), Utc::now());
        assert!(!workspace.remove(&without_mounts).await.unwrap());
        assert!(prepared.root.exists());

        let run = Run::from_new(RunId(2), new(prepared.mounts.clone()), Utc::now());
        assert!(workspace.remove(&run).await.unwrap());
        assert!(!prepared.root.exists());
        assert!(tmp.path().exists());
    }
}
