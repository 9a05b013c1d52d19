// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Vigil CLI library - exposes testable components
//!
//! - [`daemon`]: the `serve` host and the HTTP client the other commands use
//! - [`commands`]: operator command handlers

pub mod commands;
pub mod daemon;
