// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for toolrun CLI

pub mod config;
pub mod runs;
pub mod tools;

pub use self::config::ConfigCommand;
pub use self::runs::RunsCommand;
pub use self::tools::ToolsCommand;
