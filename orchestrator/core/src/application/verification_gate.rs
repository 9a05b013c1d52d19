// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Verification Gate
//!
//! Decides whether a strategy's work is accepted. The gate runs only after
//! every task has settled, and a strategy completes **iff** the full check
//! run passed with no failed or cancelled task.
//!
//! Infrastructure errors and timeouts from the [`Verifier`] are retried
//! through the [`RetryPolicy`]. A run that reports failing checks is an
//! answer, not an error, and is never retried.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::retry::RetryPolicy;
use crate::domain::events::StrategyEvent;
use crate::domain::strategy::Strategy;
use crate::domain::task::{ExecutionReport, TaskStatus};
use crate::domain::verification::{VerificationResult, Verifier};
use crate::infrastructure::event_bus::EventBus;

/// Failing-check id used when the verifier itself could not run
pub const INFRASTRUCTURE_CHECK: &str = "verification:infrastructure";

#[derive(Debug, Error, PartialEq)]
pub enum GateError {
    #[error("Strategy still has unfinished tasks: {}", .0.join(", "))]
    NotReady(Vec<String>),
}

pub struct VerificationGate {
    verifier: Arc<dyn Verifier>,
    retry: RetryPolicy,
    event_bus: Option<Arc<EventBus>>,
}

impl VerificationGate {
    pub fn new(verifier: Arc<dyn Verifier>, retry: RetryPolicy) -> Self {
        Self {
            verifier,
            retry,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub async fn verify(&self, strategy: &Strategy, report: &ExecutionReport) -> Result<VerificationResult, GateError> {
        let unfinished = strategy.unfinished_tasks();
        if !unfinished.is_empty() {
            return Err(GateError::NotReady(unfinished));
        }

        let started = Instant::now();
        let operation = format!("verify:{}", self.verifier.name());
        let outcome = self
            .retry
            .run(&operation, || self.verifier.verify(strategy, report))
            .await;

        let task_failures: Vec<String> = strategy
            .tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Cancelled))
            .map(|t| format!("task:{}", t.key))
            .collect();

        let result = match outcome {
            Ok(outcome) => {
                let mut failing_checks = outcome.failing_checks;
                failing_checks.extend(task_failures);
                if outcome.passed && failing_checks.is_empty() {
                    VerificationResult::passed(outcome.detail)
                } else {
                    VerificationResult::failed(outcome.detail, failing_checks)
                }
            }
            Err(err) => {
                warn!(strategy_id = %strategy.id, error = %err, "Verification could not run");
                let mut failing_checks = vec![INFRASTRUCTURE_CHECK.to_string()];
                failing_checks.extend(task_failures);
                VerificationResult::failed(format!("verification did not complete: {}", err), failing_checks)
            }
        }
        .with_duration(started.elapsed());

        metrics::counter!(
            "vigil_verifications_total",
            "result" => if result.passed { "passed" } else { "failed" }
        )
        .increment(1);
        info!(
            strategy_id = %strategy.id,
            passed = result.passed,
            failing = result.failing_checks.len(),
            duration = ?result.duration,
            "Verification finished"
        );
        Ok(result)
    }

    /// Record the verdict on the strategy: Completed iff it passed, Failed otherwise
    pub fn apply(&self, strategy: &mut Strategy, result: VerificationResult) {
        if let Some(bus) = &self.event_bus {
            bus.publish_strategy_event(StrategyEvent::StrategyVerified {
                strategy_id: strategy.id,
                passed: result.passed,
                failing_checks: result.failing_checks.clone(),
                verified_at: Utc::now(),
            });
        }
        strategy.record_verification(result);
        info!(strategy_id = %strategy.id, status = ?strategy.status, "Strategy settled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cost::Tier;
    use crate::domain::strategy::StrategyStatus;
    use crate::domain::task::{Task, TaskId};
    use crate::domain::verification::{VerifierError, VerifierOutcome};
    use crate::domain::{Severity, Signal};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    struct MockVerifier {
        calls: AtomicU32,
        infra_failures: u32,
        failing_checks: Vec<String>,
    }

    impl MockVerifier {
        fn new(infra_failures: u32, failing_checks: &[&str]) -> Self {
            Self {
                calls: AtomicU32::new(0),
                infra_failures,
                failing_checks: failing_checks.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    #[async_trait]
    impl Verifier for MockVerifier {
        async fn verify(&self, _strategy: &Strategy, _report: &ExecutionReport) -> Result<VerifierOutcome, VerifierError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.infra_failures {
                return Err(VerifierError::Infrastructure("runner offline".into()));
            }
            Ok(VerifierOutcome {
                passed: self.failing_checks.is_empty(),
                detail: "ran suite".into(),
                failing_checks: self.failing_checks.clone(),
            })
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(1))
            .with_backoff(Duration::from_millis(1))
            .with_max_retries(2)
    }

    fn strategy(statuses: &[TaskStatus]) -> Strategy {
        let mut strategy = Strategy::new(Uuid::new_v4(), Signal::new("ci", "build", Severity::Low, json!({})), Vec::new());
        for (i, status) in statuses.iter().enumerate() {
            let key = format!("t{}", i);
            let mut task = Task::new(TaskId::derive(strategy.id, &key), key, "", BTreeSet::new(), Tier::Local);
            match status {
                TaskStatus::Pending => {}
                TaskStatus::Dispatched => task.dispatch().unwrap(),
                TaskStatus::Completed => {
                    task.dispatch().unwrap();
                    task.complete("ok".into()).unwrap();
                }
                TaskStatus::Failed => {
                    task.dispatch().unwrap();
                    task.fail("boom").unwrap();
                }
                TaskStatus::Cancelled => task.cancel("upstream").unwrap(),
            }
            strategy.tasks.push(task);
        }
        strategy
    }

    #[tokio::test]
    async fn test_refuses_until_tasks_settle() {
        let gate = VerificationGate::new(Arc::new(MockVerifier::new(0, &[])), policy());
        let err = gate
            .verify(&strategy(&[TaskStatus::Completed, TaskStatus::Dispatched]), &ExecutionReport::default())
            .await
            .unwrap_err();
        assert_eq!(err, GateError::NotReady(vec!["t1".into()]));
    }

    #[tokio::test]
    async fn test_passes_only_when_everything_is_green() {
        let gate = VerificationGate::new(Arc::new(MockVerifier::new(0, &[])), policy());
        let mut strategy = strategy(&[TaskStatus::Completed, TaskStatus::Completed]);

        let result = gate.verify(&strategy, &ExecutionReport::default()).await.unwrap();
        assert!(result.passed);
        gate.apply(&mut strategy, result);
        assert_eq!(strategy.status, StrategyStatus::Completed);
    }

    #[tokio::test]
    async fn test_failed_and_cancelled_tasks_fail_the_gate() {
        let gate = VerificationGate::new(Arc::new(MockVerifier::new(0, &[])), policy());
        let mut strategy = strategy(&[TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled]);

        let result = gate.verify(&strategy, &ExecutionReport::default()).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.failing_checks, vec!["task:t1", "task:t2"]);
        gate.apply(&mut strategy, result);
        assert_eq!(strategy.status, StrategyStatus::Failed);
    }

    #[tokio::test]
    async fn test_failing_checks_are_not_retried() {
        let verifier = Arc::new(MockVerifier::new(0, &["suite::login"]));
        let gate = VerificationGate::new(verifier.clone(), policy());

        let result = gate.verify(&strategy(&[TaskStatus::Completed]), &ExecutionReport::default()).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.failing_checks, vec!["suite::login"]);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_infrastructure_errors_are_retried() {
        let verifier = Arc::new(MockVerifier::new(2, &[]));
        let gate = VerificationGate::new(verifier.clone(), policy());

        let result = gate.verify(&strategy(&[TaskStatus::Completed]), &ExecutionReport::default()).await.unwrap();
        assert!(result.passed);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_infrastructure_retries_fail_closed() {
        let verifier = Arc::new(MockVerifier::new(10, &[]));
        let gate = VerificationGate::new(verifier.clone(), policy());

        let result = gate.verify(&strategy(&[TaskStatus::Completed]), &ExecutionReport::default()).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.failing_checks, vec![INFRASTRUCTURE_CHECK]);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 3);
    }
}
