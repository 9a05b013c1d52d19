// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Worker collaborator interface.
//!
//! The execution engine treats workers as opaque and polymorphic over the
//! tier they serve. Which concrete implementation backs a tier is decided
//! once, when the capability map is built.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::errors::Retryable;
use crate::domain::strategy::StrategyId;
use crate::domain::task::Task;
use crate::domain::Signal;

/// Read-only context handed to a worker with its task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub strategy_id: StrategyId,
    pub signal: Signal,
    /// Outputs of the task's direct dependencies, keyed by task key
    pub upstream: BTreeMap<String, String>,
}

/// Successful worker result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub content: String,
    /// Agent name recorded in the cost ledger
    pub agent: String,
    /// Billing units consumed (tokens for model workers)
    pub unit_count: u64,
    pub cost: f64,
}

impl Artifact {
    pub fn free(agent: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            agent: agent.into(),
            unit_count: 0,
            cost: 0.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Transient worker failure: {0}")]
    Transient(String),

    /// The response lacked required content; retried like a transient failure
    #[error("Incomplete context: {0}")]
    IncompleteContext(String),

    #[error("Worker rejected task: {0}")]
    Rejected(String),
}

impl Retryable for WorkerError {
    fn is_transient(&self) -> bool {
        matches!(self, WorkerError::Transient(_) | WorkerError::IncompleteContext(_))
    }
}

#[async_trait]
pub trait Worker: Send + Sync {
    async fn execute(&self, task: &Task, context: &TaskContext) -> Result<Artifact, WorkerError>;

    /// Cheap reachability probe run at startup
    async fn health_check(&self) -> Result<(), WorkerError> {
        Ok(())
    }

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_context_is_retried() {
        assert!(WorkerError::IncompleteContext("missing diff".into()).is_transient());
        assert!(WorkerError::Transient("503".into()).is_transient());
        assert!(!WorkerError::Rejected("unsupported".into()).is_transient());
    }
}
