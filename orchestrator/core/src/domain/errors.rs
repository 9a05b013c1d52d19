// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Error Taxonomy
//!
//! Every component error maps onto one of five orchestrator-level classes.
//! The class decides what happens next:
//!
//! | Class | Handling |
//! |-------|----------|
//! | `Transient` | retried by the timeout/retry wrapper, then reported on the owning task |
//! | `Validation` | rejected at construction time, never retried |
//! | `VerificationFailure` | blocks strategy acceptance, triggers re-planning |
//! | `BudgetExceeded` | advisory; tier selection drops to local-only |
//! | `Fatal` | halts new dispatch, requires operator attention |

use thiserror::Error;

use crate::domain::strategy::StrategyId;

/// Classifies an error for the retry wrapper.
///
/// Timeouts are always retried by the wrapper itself; this only decides
/// whether an error *returned* by the operation is worth another attempt.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Verification failed for strategy {strategy_id}: {} failing check(s)", failing_checks.len())]
    VerificationFailure {
        strategy_id: StrategyId,
        failing_checks: Vec<String>,
    },

    #[error("Budget exceeded: spent {spent:.4} of {ceiling:.4}")]
    BudgetExceeded { spent: f64, ceiling: f64 },

    #[error("Fatal: {0}")]
    Fatal(String),
}

impl OrchestratorError {
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::Transient(_) => "transient",
            OrchestratorError::Validation(_) => "validation",
            OrchestratorError::VerificationFailure { .. } => "verification_failure",
            OrchestratorError::BudgetExceeded { .. } => "budget_exceeded",
            OrchestratorError::Fatal(_) => "fatal",
        }
    }
}

impl Retryable for OrchestratorError {
    fn is_transient(&self) -> bool {
        matches!(self, OrchestratorError::Transient(_))
    }
}

impl From<crate::domain::strategy::DagValidationError> for OrchestratorError {
    fn from(err: crate::domain::strategy::DagValidationError) -> Self {
        OrchestratorError::Validation(err.to_string())
    }
}

impl From<crate::domain::repository::RepositoryError> for OrchestratorError {
    fn from(err: crate::domain::repository::RepositoryError) -> Self {
        OrchestratorError::Transient(err.to_string())
    }
}
