// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Toolrun core
//!
//! Discovers containerized tools, validates run requests against their
//! declared specs and executes them in isolated per-run workspaces.
//!
//! # Architecture
//!
//! - **domain:** runs, tool specs, validation, ports
//! - **application:** discovery, execution engine, run service
//! - **infrastructure:** Docker runtime, repositories, event bus

pub mod domain;
pub mod application;
pub mod infrastructure;
