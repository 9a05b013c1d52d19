// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Action Stage
//!
//! Consumes `strategies`, executes each through the [`ExecutionEngine`],
//! decides acceptance through the [`VerificationGate`], persists the result
//! and publishes an [`OutcomeEvent`] on `outcomes`.
//!
//! The message is acknowledged last. A strategy that is already terminal
//! when (re)delivered is not executed again; its outcome is republished so
//! a crash between saving and publishing loses nothing. A strategy whose
//! execution was interrupted by a shutdown or a fatal halt stays
//! unacknowledged; on redelivery its remaining Pending tasks run.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::execution_engine::ExecutionEngine;
use crate::application::retry::RetryPolicy;
use crate::application::verification_gate::VerificationGate;
use crate::domain::errors::OrchestratorError;
use crate::domain::events::OutcomeEvent;
use crate::domain::message::{topics, Message};
use crate::domain::repository::StrategyRepository;
use crate::domain::strategy::{Strategy, StrategyStatus};
use crate::domain::task::TaskStatus;
use crate::domain::verification::VerificationResult;
use crate::infrastructure::message_bus::{BusError, MessageBus};

pub const ACTION_SUBSCRIBER: &str = "action";

#[derive(Debug, Clone, PartialEq)]
pub enum ActionDisposition {
    Settled { passed: bool },
    /// Terminal before this delivery; outcome republished
    AlreadySettled { passed: bool },
    /// Fatal halt during execution; left unacknowledged
    Halted,
    /// Shutdown during execution; left unacknowledged with tasks still Pending
    Suspended,
    Discarded(String),
}

impl ActionDisposition {
    pub fn should_acknowledge(&self) -> bool {
        !matches!(self, ActionDisposition::Halted | ActionDisposition::Suspended)
    }
}

pub struct ActionStage {
    bus: MessageBus,
    repo: Arc<dyn StrategyRepository>,
    engine: ExecutionEngine,
    gate: VerificationGate,
    retry: RetryPolicy,
}

impl ActionStage {
    pub fn new(bus: MessageBus, repo: Arc<dyn StrategyRepository>, engine: ExecutionEngine, gate: VerificationGate) -> Self {
        Self {
            bus,
            repo,
            engine,
            gate,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn handle_strategy(&self, message: &Message) -> Result<ActionDisposition, OrchestratorError> {
        let published: Strategy = match message.decode() {
            Ok(strategy) => strategy,
            Err(err) => {
                warn!(message_id = %message.id, error = %err, "Discarding malformed strategy");
                return Ok(ActionDisposition::Discarded(err.to_string()));
            }
        };

        // The repository copy carries progress from earlier deliveries
        let mut strategy = self.repo.find_by_id(published.id).await?.unwrap_or(published);

        if strategy.is_terminal() {
            info!(strategy_id = %strategy.id, status = ?strategy.status, "Strategy already settled; republishing outcome");
            self.publish_outcome(&strategy).await?;
            return Ok(ActionDisposition::AlreadySettled {
                passed: strategy.status == StrategyStatus::Completed,
            });
        }

        if message.is_redelivery() {
            warn!(strategy_id = %strategy.id, delivery_attempt = message.delivery_attempt, "Resuming strategy after redelivery");
        }
        strategy.mark_executing();
        self.repo.save(&strategy).await?;
        info!(strategy_id = %strategy.id, tasks = strategy.tasks.len(), "Executing strategy");

        let report = self.engine.execute(&mut strategy).await;
        self.repo.save(&strategy).await?;
        if report.halted {
            error!(strategy_id = %strategy.id, "Strategy halted before settling");
            return Ok(ActionDisposition::Halted);
        }
        if report.suspended {
            info!(
                strategy_id = %strategy.id,
                pending = strategy.count(TaskStatus::Pending),
                "Strategy suspended for shutdown; resumes on redelivery"
            );
            return Ok(ActionDisposition::Suspended);
        }

        strategy.mark_verifying();
        self.repo.save(&strategy).await?;
        let result = self
            .gate
            .verify(&strategy, &report)
            .await
            .map_err(|e| OrchestratorError::Fatal(e.to_string()))?;
        let passed = result.passed;
        if !passed {
            let failure = OrchestratorError::VerificationFailure {
                strategy_id: strategy.id,
                failing_checks: result.failing_checks.clone(),
            };
            warn!(strategy_id = %strategy.id, error = %failure, "Strategy not accepted");
        }
        self.gate.apply(&mut strategy, result);
        self.repo.save(&strategy).await?;

        self.publish_outcome(&strategy).await?;
        metrics::counter!(
            "vigil_strategies_settled_total",
            "result" => if passed { "completed" } else { "failed" }
        )
        .increment(1);
        Ok(ActionDisposition::Settled { passed })
    }

    async fn publish_outcome(&self, strategy: &Strategy) -> Result<(), OrchestratorError> {
        let outcome = outcome_event(strategy);
        self.retry
            .run("publish:outcomes", || {
                self.bus.publish(topics::OUTCOMES, &outcome, strategy.correlation_id)
            })
            .await?;
        Ok(())
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), OrchestratorError> {
        let subscription = self.bus.subscribe(topics::STRATEGIES, ACTION_SUBSCRIBER)?;
        info!("Action stage started");
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.retry.run_untimed("next:strategies", || subscription.next()) => match next {
                    Ok(message) => message,
                    Err(err) if matches!(err.last_error(), Some(BusError::Closed)) => break,
                    Err(err) => return Err(OrchestratorError::Fatal(err.to_string())),
                },
            };
            match self.handle_strategy(&message).await {
                Ok(disposition) if disposition.should_acknowledge() => self
                    .retry
                    .run("ack:strategies", || subscription.acknowledge(&message.id))
                    .await
                    .map_err(|e| OrchestratorError::Fatal(e.to_string()))?,
                Ok(disposition) => warn!(
                    correlation_id = %message.correlation_id,
                    disposition = ?disposition,
                    "Interrupted strategy left for redelivery"
                ),
                Err(err) => warn!(
                    correlation_id = %message.correlation_id,
                    error = %err,
                    "Strategy left for redelivery"
                ),
            }
        }
        info!("Action stage stopped");
        Ok(())
    }
}

/// Build the `outcomes` payload for a settled strategy
pub fn outcome_event(strategy: &Strategy) -> OutcomeEvent {
    let completed = strategy.count(TaskStatus::Completed);
    let completed_ratio = if strategy.tasks.is_empty() {
        0.0
    } else {
        completed as f64 / strategy.tasks.len() as f64
    };
    let verification = strategy
        .verification
        .clone()
        .unwrap_or_else(|| VerificationResult::failed("not verified", vec!["verification:missing".to_string()]));

    OutcomeEvent {
        strategy_id: strategy.id,
        correlation_id: strategy.correlation_id,
        signal: strategy.signal.clone(),
        passed: strategy.status == StrategyStatus::Completed && verification.passed,
        completed_ratio,
        failing_checks: verification.failing_checks,
        detail: verification.detail,
        verified_at: verification.verified_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::cost_router::CostRouter;
    use crate::application::dag_builder::DagBuilder;
    use crate::application::execution_engine::CapabilityMap;
    use crate::application::retry::RetryPolicy;
    use crate::domain::cost::Tier;
    use crate::domain::node_config::{BusConfig, RouterConfig};
    use crate::domain::strategy::{StrategyIntent, TaskSpec};
    use crate::domain::worker::{Artifact, TaskContext, Worker, WorkerError};
    use crate::domain::task::Task;
    use crate::domain::{Severity, Signal};
    use crate::infrastructure::repositories::InMemoryStrategyRepository;
    use crate::infrastructure::verifiers::StaticVerifier;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    struct CountingWorker {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Worker for CountingWorker {
        async fn execute(&self, task: &Task, _context: &TaskContext) -> Result<Artifact, WorkerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Artifact::free("counter", task.key.clone()))
        }

        fn name(&self) -> &str {
            "counter"
        }
    }

    struct Fixture {
        bus: MessageBus,
        repo: Arc<InMemoryStrategyRepository>,
        worker: Arc<CountingWorker>,
        stage: ActionStage,
        strategy: Strategy,
    }

    fn fixture(verdict: bool) -> Fixture {
        let bus = MessageBus::temporary(&BusConfig::default()).unwrap();
        let repo = Arc::new(InMemoryStrategyRepository::new());
        let router = Arc::new(CostRouter::new(&RouterConfig::default()));
        let worker = Arc::new(CountingWorker { calls: AtomicU32::new(0) });
        let retry = RetryPolicy::new(Duration::from_secs(1)).with_backoff(Duration::from_millis(1));

        let capabilities = CapabilityMap::new().with(Tier::Local, worker.clone());
        let strategy = DagBuilder::new(router.clone(), capabilities.tiers())
            .build(StrategyIntent {
                correlation_id: Uuid::new_v4(),
                signal: Signal::new("ci", "build", Severity::Low, json!({})),
                tasks: vec![TaskSpec::new("a", ""), TaskSpec::new("b", "").after(["a"])],
            })
            .unwrap();

        let engine = ExecutionEngine::new(capabilities, router, retry.clone());
        let gate = VerificationGate::new(Arc::new(StaticVerifier::new(verdict)), retry);
        let stage = ActionStage::new(bus.clone(), repo.clone(), engine, gate);
        Fixture { bus, repo, worker, stage, strategy }
    }

    fn message(strategy: &Strategy, attempt: u32) -> Message {
        let mut message = Message::new(topics::STRATEGIES, 0, serde_json::to_value(strategy).unwrap(), strategy.correlation_id);
        message.delivery_attempt = attempt;
        message
    }

    #[tokio::test]
    async fn test_strategy_is_executed_verified_and_published() {
        let f = fixture(true);

        let disposition = f.stage.handle_strategy(&message(&f.strategy, 1)).await.unwrap();
        assert_eq!(disposition, ActionDisposition::Settled { passed: true });

        let saved = f.repo.find_by_id(f.strategy.id).await.unwrap().unwrap();
        assert_eq!(saved.status, StrategyStatus::Completed);
        let outcomes = f.bus.read_from(topics::OUTCOMES, 0, 10).unwrap();
        assert_eq!(outcomes.len(), 1);
        let outcome: OutcomeEvent = outcomes[0].decode().unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.completed_ratio, 1.0);
        assert_eq!(outcomes[0].correlation_id, f.strategy.correlation_id);
    }

    #[tokio::test]
    async fn test_redelivered_settled_strategy_is_not_reexecuted() {
        let f = fixture(true);
        f.stage.handle_strategy(&message(&f.strategy, 1)).await.unwrap();
        let calls = f.worker.calls.load(Ordering::SeqCst);

        let again = f.stage.handle_strategy(&message(&f.strategy, 2)).await.unwrap();
        assert_eq!(again, ActionDisposition::AlreadySettled { passed: true });
        assert_eq!(f.worker.calls.load(Ordering::SeqCst), calls);
        assert_eq!(f.bus.topic_len(topics::OUTCOMES).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_verification_fails_strategy() {
        let f = fixture(false);

        let disposition = f.stage.handle_strategy(&message(&f.strategy, 1)).await.unwrap();
        assert_eq!(disposition, ActionDisposition::Settled { passed: false });
        let saved = f.repo.find_by_id(f.strategy.id).await.unwrap().unwrap();
        assert_eq!(saved.status, StrategyStatus::Failed);

        let outcome: OutcomeEvent = f.bus.read_from(topics::OUTCOMES, 0, 1).unwrap()[0].decode().unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.failing_checks, vec!["static"]);
    }
}
