// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Application Layer (`vigil-core`)
//!
//! Use cases and pipeline stages orchestrating the domain.
//!
//! | Module | Role |
//! |--------|------|
//! | [`retry`] | timeout/retry wrapper for external calls |
//! | [`cost_router`] | tier selection, cost ledger, budget latch |
//! | [`dag_builder`] | intent → validated strategy |
//! | [`execution_engine`] | wave scheduling over the capability map |
//! | [`verification_gate`] | strategy acceptance |
//! | [`planner`] | template planner |
//! | [`perception`], [`cognition`], [`action`] | pipeline stages |
//! | [`directive`] | operator entry point and status queries |

pub mod action;
pub mod cognition;
pub mod cost_router;
pub mod dag_builder;
pub mod directive;
pub mod execution_engine;
pub mod perception;
pub mod planner;
pub mod retry;
pub mod verification_gate;

pub use action::ActionStage;
pub use cognition::CognitionStage;
pub use cost_router::CostRouter;
pub use dag_builder::DagBuilder;
pub use directive::{DirectiveService, StrategyStatusView};
pub use execution_engine::{CapabilityMap, ExecutionEngine};
pub use perception::PerceptionStage;
pub use planner::TemplatePlanner;
pub use retry::{RetryError, RetryPolicy};
pub use verification_gate::{GateError, VerificationGate};
