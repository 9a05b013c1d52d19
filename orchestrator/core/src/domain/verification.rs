// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Verification contracts.
//!
//! A [`Verifier`] runs the full correctness check for a strategy (for a code
//! project: every test). It must be invocable repeatedly and must not touch
//! the strategy's tasks.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::errors::Retryable;
use crate::domain::strategy::Strategy;
use crate::domain::task::ExecutionReport;

/// Produced once per verification run of a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub detail: String,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Identifiers of every failing check; empty when `passed`
    #[serde(default)]
    pub failing_checks: Vec<String>,
    pub verified_at: DateTime<Utc>,
}

impl VerificationResult {
    pub fn passed(detail: impl Into<String>) -> Self {
        Self {
            passed: true,
            detail: detail.into(),
            duration: Duration::ZERO,
            failing_checks: Vec::new(),
            verified_at: Utc::now(),
        }
    }

    pub fn failed(detail: impl Into<String>, failing_checks: Vec<String>) -> Self {
        Self {
            passed: false,
            detail: detail.into(),
            duration: Duration::ZERO,
            failing_checks,
            verified_at: Utc::now(),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// What a verifier reports for one check run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierOutcome {
    pub passed: bool,
    pub detail: String,
    #[serde(default)]
    pub failing_checks: Vec<String>,
}

/// Infrastructure problems running the check, as opposed to failing checks
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("Verification infrastructure error: {0}")]
    Infrastructure(String),

    #[error("Verification misconfigured: {0}")]
    Misconfigured(String),
}

impl Retryable for VerifierError {
    fn is_transient(&self) -> bool {
        matches!(self, VerifierError::Infrastructure(_))
    }
}

#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, strategy: &Strategy, report: &ExecutionReport) -> Result<VerifierOutcome, VerifierError>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_serializes_human_readable() {
        let result = VerificationResult::passed("all green").with_duration(Duration::from_millis(1500));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["duration"], "1s 500ms");
        let back: VerificationResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.duration, Duration::from_millis(1500));
    }

    #[test]
    fn test_only_infrastructure_errors_are_transient() {
        assert!(VerifierError::Infrastructure("spawn failed".into()).is_transient());
        assert!(!VerifierError::Misconfigured("empty command".into()).is_transient());
    }
}
