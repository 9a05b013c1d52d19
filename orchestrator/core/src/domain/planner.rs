// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Planner collaborator: proposes a strategy for a signal given the patterns
//! pattern memory recognised. Proposals are validated by the DAG builder
//! before anything is published.

use async_trait::async_trait;
use thiserror::Error;
use vigil_cortex::Pattern;

use crate::domain::strategy::StrategyIntent;
use crate::domain::Signal;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("No plan for signal: {0}")]
    NoPlan(String),

    #[error("Planner unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, signal: &Signal, patterns: &[Pattern]) -> Result<StrategyIntent, PlannerError>;
}
