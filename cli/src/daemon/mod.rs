// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon mode implementation
//!
//! Handles:
//! - hosting the pipeline and the HTTP API in the foreground (`vigil serve`)
//! - talking to a running host from the other commands

pub mod client;
pub mod server;

pub use client::DaemonClient;
pub use server::serve;
