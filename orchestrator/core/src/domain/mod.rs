// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Domain model of the orchestration substrate: signals, strategies and
//! their tasks, cost and verification value types, and the collaborator
//! ports (workers, verifiers, planners, telemetry, model providers).
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure types and traits; no I/O

pub mod errors;
pub mod message;
pub mod cost;
pub mod task;
pub mod strategy;
pub mod verification;
pub mod worker;
pub mod planner;
pub mod telemetry;
pub mod llm;
pub mod events;
pub mod repository;
pub mod node_config;

pub use vigil_cortex::domain::signal::{Severity, Signal, SignalId, Signature};
