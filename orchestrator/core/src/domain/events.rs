// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::run::{RunId, RunStatus};

/// Run lifecycle events, published after the matching transition is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: RunId,
        container_id: String,
        started_at: DateTime<Utc>,
    },
    RunFinished {
        run_id: RunId,
        exit_code: i64,
        finished_at: DateTime<Utc>,
    },
    RunErrored {
        run_id: RunId,
        error: String,
        errored_at: DateTime<Utc>,
    },
    MetadataRecorded {
        run_id: RunId,
        recorded_at: DateTime<Utc>,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::RunFinished { run_id, .. }
            | RunEvent::RunErrored { run_id, .. }
            | RunEvent::MetadataRecorded { run_id, .. } => *run_id,
        }
    }

    /// Status the run is in once this event has been published, if it changed.
    pub fn resulting_status(&self) -> Option<RunStatus> {
        match self {
            RunEvent::RunStarted { .. } => Some(RunStatus::Running),
            RunEvent::RunFinished { .. } => Some(RunStatus::Finished),
            RunEvent::RunErrored { .. } => Some(RunStatus::Errored),
            RunEvent::MetadataRecorded { .. } => None,
        }
    }
}
