// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cognition Stage
//!
//! Two loops that share pattern memory:
//!
//! - **Planning** consumes `signals`, queries the pattern store, asks the
//!   [`Planner`] for an intent, validates it by building the DAG, saves the
//!   strategy and publishes it on `strategies`.
//! - **Learning** consumes `outcomes`, folds each verdict back into pattern
//!   memory, and asks for a new plan when verification failed.
//!
//! Redelivered signals map to the same [`StrategyId`] (derived from the
//! correlation id), so a signal is planned at most once. Rejected plans are
//! acknowledged with a `plan_rejected` advisory and never retried; storage
//! or bus failures leave the message unacknowledged for redelivery.
//!
//! Every bus call goes through the [`RetryPolicy`]; only a bus that stays
//! unavailable after the retries stops a loop.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vigil_cortex::{CortexService, Evidence};

use crate::application::dag_builder::DagBuilder;
use crate::application::retry::RetryPolicy;
use crate::domain::errors::OrchestratorError;
use crate::domain::events::{Advisory, OutcomeEvent, StrategyEvent};
use crate::domain::message::{topics, Message, MessageId};
use crate::domain::planner::{Planner, PlannerError};
use crate::domain::repository::StrategyRepository;
use crate::domain::strategy::{StrategyId, StrategyStatus};
use crate::domain::Signal;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::message_bus::{BusError, MessageBus};

pub const PLANNER_SUBSCRIBER: &str = "cognition";
pub const LEARNER_SUBSCRIBER: &str = "cognition-learning";
pub const DEFAULT_QUERY_LIMIT: usize = 5;

/// What the planning loop did with one signal
#[derive(Debug, Clone, PartialEq)]
pub enum PlanDisposition {
    Planned(StrategyId),
    /// Redelivery of a signal whose strategy was saved but maybe not published
    Republished(StrategyId),
    /// Redelivery of a signal whose strategy is already past planning
    AlreadyPlanned(StrategyId),
    Rejected(String),
}

/// What the learning loop did with one outcome
#[derive(Debug, Clone, PartialEq)]
pub enum LearningDisposition {
    Recorded { passed: bool, score: f64 },
    AlreadyRecorded,
    Discarded(String),
}

pub struct CognitionStage {
    bus: MessageBus,
    cortex: Arc<dyn CortexService>,
    planner: Arc<dyn Planner>,
    dag: DagBuilder,
    repo: Arc<dyn StrategyRepository>,
    event_bus: Option<Arc<EventBus>>,
    query_limit: usize,
    retry: RetryPolicy,
}

impl CognitionStage {
    pub fn new(
        bus: MessageBus,
        cortex: Arc<dyn CortexService>,
        planner: Arc<dyn Planner>,
        dag: DagBuilder,
        repo: Arc<dyn StrategyRepository>,
    ) -> Self {
        Self {
            bus,
            cortex,
            planner,
            dag,
            repo,
            event_bus: None,
            query_limit: DEFAULT_QUERY_LIMIT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_query_limit(mut self, limit: usize) -> Self {
        self.query_limit = limit.max(1);
        self
    }

    pub async fn handle_signal(&self, message: &Message) -> Result<PlanDisposition, OrchestratorError> {
        let correlation_id = message.correlation_id;
        let signal: Signal = match message.decode() {
            Ok(signal) => signal,
            Err(err) => return self.reject(correlation_id, format!("malformed signal: {}", err)).await,
        };

        let strategy_id = StrategyId::for_correlation(correlation_id);
        if let Some(existing) = self.repo.find_by_id(strategy_id).await? {
            if existing.status == StrategyStatus::Planned {
                self.publish(topics::STRATEGIES, &existing, correlation_id).await?;
                info!(strategy_id = %strategy_id, "Republished planned strategy for redelivered signal");
                return Ok(PlanDisposition::Republished(strategy_id));
            }
            debug!(strategy_id = %strategy_id, status = ?existing.status, "Signal already planned");
            return Ok(PlanDisposition::AlreadyPlanned(strategy_id));
        }

        let patterns = match self.cortex.query(&signal, self.query_limit).await {
            Ok(patterns) => patterns,
            Err(err) => {
                warn!(signal_id = %signal.id, error = %err, "Pattern query failed; planning without memory");
                Vec::new()
            }
        };

        let mut intent = match self.planner.plan(&signal, &patterns).await {
            Ok(intent) => intent,
            Err(PlannerError::Unavailable(reason)) => return Err(OrchestratorError::Transient(reason)),
            Err(err @ PlannerError::NoPlan(_)) => return self.reject(correlation_id, err.to_string()).await,
        };
        intent.correlation_id = correlation_id;

        let strategy = match self.dag.build(intent) {
            Ok(strategy) => strategy,
            Err(err) => return self.reject(correlation_id, err.to_string()).await,
        };

        self.repo.save(&strategy).await?;
        self.publish(topics::STRATEGIES, &strategy, correlation_id).await?;

        if let Some(bus) = &self.event_bus {
            bus.publish_strategy_event(StrategyEvent::StrategyPlanned {
                strategy_id: strategy.id,
                correlation_id,
                task_count: strategy.tasks.len(),
                planned_at: Utc::now(),
            });
        }
        metrics::counter!("vigil_strategies_planned_total").increment(1);
        info!(
            strategy_id = %strategy.id,
            signal_id = %signal.id,
            patterns = patterns.len(),
            tasks = strategy.tasks.len(),
            "Strategy planned"
        );
        Ok(PlanDisposition::Planned(strategy.id))
    }

    async fn reject(&self, correlation_id: Uuid, reason: String) -> Result<PlanDisposition, OrchestratorError> {
        warn!(correlation_id = %correlation_id, reason = %reason, "Plan rejected");
        let advisory = Advisory::PlanRejected {
            correlation_id,
            reason: reason.clone(),
            rejected_at: Utc::now(),
        };
        self.publish(topics::ADVISORIES, &advisory, correlation_id).await?;
        metrics::counter!("vigil_plans_rejected_total").increment(1);
        Ok(PlanDisposition::Rejected(reason))
    }

    pub async fn handle_outcome(&self, message: &Message) -> Result<LearningDisposition, OrchestratorError> {
        let outcome: OutcomeEvent = match message.decode() {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(message_id = %message.id, error = %err, "Discarding malformed outcome");
                return Ok(LearningDisposition::Discarded(err.to_string()));
            }
        };

        let mut strategy = self.repo.find_by_id(outcome.strategy_id).await?;
        if strategy.as_ref().is_some_and(|s| s.learning_recorded) {
            debug!(strategy_id = %outcome.strategy_id, "Outcome already learned");
            return Ok(LearningDisposition::AlreadyRecorded);
        }

        let score = if outcome.passed {
            1.0
        } else {
            0.5 * outcome.completed_ratio.clamp(0.0, 1.0)
        };
        let evidence = Evidence::new(score).from_signal(outcome.signal.id);
        let pattern = self
            .cortex
            .record(outcome.signal.signature(), evidence)
            .await
            .map_err(|e| OrchestratorError::Transient(e.to_string()))?;

        if !outcome.passed {
            let advisory = Advisory::ReplanRequested {
                strategy_id: outcome.strategy_id,
                correlation_id: outcome.correlation_id,
                failing_checks: outcome.failing_checks.clone(),
                detail: outcome.detail.clone(),
                requested_at: Utc::now(),
            };
            self.publish(topics::ADVISORIES, &advisory, outcome.correlation_id).await?;
        }

        if let Some(strategy) = strategy.as_mut() {
            strategy.learning_recorded = true;
            strategy.touch();
            self.repo.save(strategy).await?;
        }

        info!(
            strategy_id = %outcome.strategy_id,
            pattern_id = %pattern.id,
            passed = outcome.passed,
            score,
            confidence = pattern.confidence,
            "Outcome folded into pattern memory"
        );
        Ok(LearningDisposition::Recorded {
            passed: outcome.passed,
            score,
        })
    }

    async fn publish<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        payload: &T,
        correlation_id: Uuid,
    ) -> Result<MessageId, OrchestratorError> {
        let operation = format!("publish:{}", topic);
        Ok(self
            .retry
            .run(&operation, || self.bus.publish(topic, payload, correlation_id))
            .await?)
    }

    /// Planning loop over `signals`
    pub async fn run_planning(&self, shutdown: CancellationToken) -> Result<(), OrchestratorError> {
        let subscription = self.bus.subscribe(topics::SIGNALS, PLANNER_SUBSCRIBER)?;
        info!("Cognition planning loop started");
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.retry.run_untimed("next:signals", || subscription.next()) => match next {
                    Ok(message) => message,
                    Err(err) if matches!(err.last_error(), Some(BusError::Closed)) => break,
                    Err(err) => return Err(OrchestratorError::Fatal(err.to_string())),
                },
            };
            match self.handle_signal(&message).await {
                Ok(_) => self
                    .retry
                    .run("ack:signals", || subscription.acknowledge(&message.id))
                    .await
                    .map_err(|e| OrchestratorError::Fatal(e.to_string()))?,
                Err(err) => warn!(
                    correlation_id = %message.correlation_id,
                    delivery_attempt = message.delivery_attempt,
                    error = %err,
                    "Signal left for redelivery"
                ),
            }
        }
        info!("Cognition planning loop stopped");
        Ok(())
    }

    /// Learning loop over `outcomes`
    pub async fn run_learning(&self, shutdown: CancellationToken) -> Result<(), OrchestratorError> {
        let subscription = self.bus.subscribe(topics::OUTCOMES, LEARNER_SUBSCRIBER)?;
        info!("Cognition learning loop started");
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.retry.run_untimed("next:outcomes", || subscription.next()) => match next {
                    Ok(message) => message,
                    Err(err) if matches!(err.last_error(), Some(BusError::Closed)) => break,
                    Err(err) => return Err(OrchestratorError::Fatal(err.to_string())),
                },
            };
            match self.handle_outcome(&message).await {
                Ok(_) => self
                    .retry
                    .run("ack:outcomes", || subscription.acknowledge(&message.id))
                    .await
                    .map_err(|e| OrchestratorError::Fatal(e.to_string()))?,
                Err(err) => warn!(
                    correlation_id = %message.correlation_id,
                    error = %err,
                    "Outcome left for redelivery"
                ),
            }
        }
        info!("Cognition learning loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::cost_router::CostRouter;
    use crate::application::planner::TemplatePlanner;
    use crate::domain::cost::Tier;
    use crate::domain::node_config::{BusConfig, RouterConfig};
    use crate::domain::strategy::{Strategy, StrategyIntent, TaskSpec};
    use crate::domain::Severity;
    use crate::infrastructure::repositories::InMemoryStrategyRepository;
    use async_trait::async_trait;
    use serde_json::json;
    use vigil_cortex::infrastructure::memory_store::InMemoryPatternRepository;
    use vigil_cortex::{NullEventBus, Pattern, StandardCortexService};

    struct CyclicPlanner;

    #[async_trait]
    impl Planner for CyclicPlanner {
        async fn plan(&self, signal: &Signal, _patterns: &[Pattern]) -> Result<StrategyIntent, PlannerError> {
            Ok(StrategyIntent {
                correlation_id: signal.id.0,
                signal: signal.clone(),
                tasks: vec![TaskSpec::new("a", "").after(["b"]), TaskSpec::new("b", "").after(["a"])],
            })
        }
    }

    struct Fixture {
        bus: MessageBus,
        repo: Arc<InMemoryStrategyRepository>,
        cortex: Arc<StandardCortexService>,
        stage: CognitionStage,
    }

    fn fixture(planner: Arc<dyn Planner>) -> Fixture {
        let bus = MessageBus::temporary(&BusConfig::default()).unwrap();
        let repo = Arc::new(InMemoryStrategyRepository::new());
        let cortex = Arc::new(StandardCortexService::new(
            Arc::new(InMemoryPatternRepository::new()),
            Arc::new(NullEventBus),
        ));
        let router = Arc::new(CostRouter::new(&RouterConfig::default()));
        let dag = DagBuilder::new(router, [Tier::Local, Tier::Cloud].into_iter().collect());
        let stage = CognitionStage::new(bus.clone(), cortex.clone(), planner, dag, repo.clone());
        Fixture { bus, repo, cortex, stage }
    }

    fn signal_message(signal: &Signal, attempt: u32) -> Message {
        let mut message = Message::new(topics::SIGNALS, 0, serde_json::to_value(signal).unwrap(), signal.id.0);
        message.delivery_attempt = attempt;
        message
    }

    fn signal() -> Signal {
        Signal::new("kubelet", "memory", Severity::Medium, json!({"message": "payments OOMKilled"}))
    }

    #[tokio::test]
    async fn test_signal_is_planned_and_published() {
        let f = fixture(Arc::new(TemplatePlanner::default()));
        let signal = signal();

        let disposition = f.stage.handle_signal(&signal_message(&signal, 1)).await.unwrap();
        let id = StrategyId::for_correlation(signal.id.0);
        assert_eq!(disposition, PlanDisposition::Planned(id));

        let saved = f.repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(saved.status, StrategyStatus::Planned);
        let published = f.bus.read_from(topics::STRATEGIES, 0, 10).unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].decode::<Strategy>().unwrap().id, id);
    }

    #[tokio::test]
    async fn test_redelivered_signal_is_not_replanned() {
        let f = fixture(Arc::new(TemplatePlanner::default()));
        let signal = signal();

        f.stage.handle_signal(&signal_message(&signal, 1)).await.unwrap();
        let again = f.stage.handle_signal(&signal_message(&signal, 2)).await.unwrap();
        let id = StrategyId::for_correlation(signal.id.0);
        assert_eq!(again, PlanDisposition::Republished(id));

        let mut executing = f.repo.find_by_id(id).await.unwrap().unwrap();
        executing.mark_executing();
        f.repo.save(&executing).await.unwrap();
        let third = f.stage.handle_signal(&signal_message(&signal, 3)).await.unwrap();
        assert_eq!(third, PlanDisposition::AlreadyPlanned(id));
        assert_eq!(f.repo.list_recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_plan_is_rejected_with_advisory() {
        let f = fixture(Arc::new(CyclicPlanner));
        let signal = signal();

        let disposition = f.stage.handle_signal(&signal_message(&signal, 1)).await.unwrap();
        assert!(matches!(disposition, PlanDisposition::Rejected(reason) if reason.contains("cycle")));
        assert_eq!(f.bus.topic_len(topics::STRATEGIES).unwrap(), 0);

        let advisories = f.bus.read_from(topics::ADVISORIES, 0, 10).unwrap();
        assert_eq!(advisories[0].payload["type"], "plan_rejected");
    }

    #[tokio::test]
    async fn test_malformed_signal_is_rejected() {
        let f = fixture(Arc::new(TemplatePlanner::default()));
        let message = Message::new(topics::SIGNALS, 0, json!({"nope": true}), uuid::Uuid::new_v4());
        let disposition = f.stage.handle_signal(&message).await.unwrap();
        assert!(matches!(disposition, PlanDisposition::Rejected(_)));
    }

    fn outcome_message(strategy: &Strategy, passed: bool, completed_ratio: f64) -> Message {
        let outcome = OutcomeEvent {
            strategy_id: strategy.id,
            correlation_id: strategy.correlation_id,
            signal: strategy.signal.clone(),
            passed,
            completed_ratio,
            failing_checks: if passed { vec![] } else { vec!["suite::login".into()] },
            detail: "cargo test".into(),
            verified_at: Utc::now(),
        };
        Message::new(topics::OUTCOMES, 0, serde_json::to_value(outcome).unwrap(), strategy.correlation_id)
    }

    #[tokio::test]
    async fn test_passing_outcome_reinforces_pattern_once() {
        let f = fixture(Arc::new(TemplatePlanner::default()));
        let signal = signal();
        f.stage.handle_signal(&signal_message(&signal, 1)).await.unwrap();
        let strategy = f.repo.find_by_id(StrategyId::for_correlation(signal.id.0)).await.unwrap().unwrap();

        let message = outcome_message(&strategy, true, 1.0);
        let first = f.stage.handle_outcome(&message).await.unwrap();
        assert_eq!(first, LearningDisposition::Recorded { passed: true, score: 1.0 });
        let second = f.stage.handle_outcome(&message).await.unwrap();
        assert_eq!(second, LearningDisposition::AlreadyRecorded);

        let patterns = f.cortex.list().await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].occurrence_count, 1);
        assert_eq!(patterns[0].signature, signal.signature());
    }

    #[tokio::test]
    async fn test_failed_outcome_requests_replan() {
        let f = fixture(Arc::new(TemplatePlanner::default()));
        let signal = signal();
        f.stage.handle_signal(&signal_message(&signal, 1)).await.unwrap();
        let strategy = f.repo.find_by_id(StrategyId::for_correlation(signal.id.0)).await.unwrap().unwrap();

        let disposition = f.stage.handle_outcome(&outcome_message(&strategy, false, 0.5)).await.unwrap();
        assert_eq!(disposition, LearningDisposition::Recorded { passed: false, score: 0.25 });

        let advisories = f.bus.read_from(topics::ADVISORIES, 0, 10).unwrap();
        assert_eq!(advisories.len(), 1);
        assert_eq!(advisories[0].payload["type"], "replan_requested");
        assert_eq!(advisories[0].payload["failing_checks"][0], "suite::login");
        assert_eq!(advisories[0].correlation_id, signal.id.0);
    }
}
