// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: run and tool-spec models, input validation, and the ports
//! (container runtime, run repository) the application layer drives.

pub mod config;
pub mod events;
pub mod repository;
pub mod result_file;
pub mod run;
pub mod runtime;
pub mod tool_spec;
pub mod validation;
