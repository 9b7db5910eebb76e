// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod discovery;
pub mod execution;
pub mod run_service;
pub mod spec_probe;
pub mod tool_cache;
pub mod workspace;

// Re-export use cases for convenience
pub use discovery::{DiscoveryError, ToolDiscovery};
pub use execution::{RunExecutor, RunOptions, RunOutcome};
pub use run_service::{CreateAndStartResult, CreateRunRequest, ErrorKind, RunDetail, ServiceError, ToolRunService};
pub use tool_cache::ToolSpecCache;
pub use workspace::RunWorkspace;
