// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Vigil CLI

pub mod config;
pub mod strategy;

pub use self::config::ConfigCommand;
pub use self::strategy::LedgerFormat;
