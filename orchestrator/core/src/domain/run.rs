// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Run Aggregate
//!
//! A `Run` is one request to execute a containerized tool. It is created in
//! `pending` by the run service, mutated by the execution engine through the
//! repository's conditional transitions, and destroyed on user delete.
//!
//! ```text
//! pending ──start ok──▶ running ──exit 0──▶ finished
//!    │                     │
//!    └──create/start err───┴──exit != 0 / wait err / logs err──▶ errored
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Container path of the input mount.
pub const IN_MOUNT: &str = "/in";
/// Container path of the output mount.
pub const OUT_MOUNT: &str = "/out";
/// Parameter document written into the input mount.
pub const INPUTS_FILE: &str = "inputs.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub i64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller identity as issued by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Finished,
    Errored,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Finished => "finished",
            RunStatus::Errored => "errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Finished | RunStatus::Errored)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown run status '{0}'. Supported: pending, running, finished, errored")]
pub struct UnknownRunStatus(pub String);

impl FromStr for RunStatus {
    type Err = UnknownRunStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "finished" => Ok(RunStatus::Finished),
            "errored" => Ok(RunStatus::Errored),
            other => Err(UnknownRunStatus(other.to_string())),
        }
    }
}

/// Everything needed to persist a new pending run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRun {
    pub name: String,
    pub title: String,
    pub description: String,
    pub docker_image: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub data: BTreeMap<String, String>,
    /// container path -> host path
    pub mounts: BTreeMap<String, String>,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub name: String,
    pub title: String,
    pub description: String,
    pub docker_image: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub data: BTreeMap<String, String>,
    pub mounts: BTreeMap<String, String>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub has_errored: bool,
    pub error_message: Option<String>,
    /// Raw JSON document the tool wrote to `_metadata.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_metadata: Option<String>,
    pub user_id: UserId,
}

impl Run {
    /// Materialize a freshly created run. Only repositories call this.
    pub fn from_new(id: RunId, new: NewRun, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: new.name,
            title: new.title,
            description: new.description,
            docker_image: new.docker_image,
            parameters: new.parameters,
            data: new.data,
            mounts: new.mounts,
            status: RunStatus::Pending,
            created_at,
            started_at: None,
            finished_at: None,
            has_errored: false,
            error_message: None,
            tool_metadata: None,
            user_id: new.user_id,
        }
    }

    pub fn slug(&self) -> String {
        crate::domain::tool_spec::tool_slug(&self.docker_image, &self.name)
    }

    pub fn input_dir(&self) -> Option<PathBuf> {
        self.mounts.get(IN_MOUNT).map(PathBuf::from)
    }

    pub fn output_dir(&self) -> Option<PathBuf> {
        self.mounts.get(OUT_MOUNT).map(PathBuf::from)
    }

    /// Host directory holding this run's mounts, removed on delete.
    pub fn workspace_root(&self) -> Option<PathBuf> {
        self.input_dir()
            .and_then(|dir| dir.parent().map(|p| p.to_path_buf()))
    }

    pub fn is_visible_to(&self, user: &UserId, admins: &AdminSet) -> bool {
        &self.user_id == user || admins.contains(user)
    }
}

/// Users allowed to see and mutate every run.
#[derive(Debug, Clone, Default)]
pub struct AdminSet(HashSet<String>);

impl AdminSet {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(ids.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.0.contains(user.as_str())
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.0.iter().cloned().collect();
        ids.sort();
        ids
    }
}
