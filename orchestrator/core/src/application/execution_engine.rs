// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Execution Engine
//!
//! Executes a validated [`Strategy`] against an explicit [`CapabilityMap`].
//!
//! Scheduling happens in waves:
//!
//! 1. Collect Pending tasks whose dependencies have all Completed, in
//!    insertion order, up to `worker_pool_size`.
//! 2. Dispatch them concurrently into a `JoinSet`; every worker call goes
//!    through the [`RetryPolicy`] and every artifact's cost is recorded in
//!    the [`CostRouter`].
//! 3. Wait for the whole wave, apply results, and re-evaluate.
//!
//! A failed task cancels every transitive dependent that is still Pending;
//! independent branches keep running. When the halt token fires, no new
//! wave starts, the running wave drains, and the remaining Pending tasks
//! are cancelled. The shutdown token also stops new waves, but leaves the
//! remaining tasks Pending so a later delivery resumes them. The engine
//! reports per-task results only; acceptance is the verification gate's
//! decision.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::cost_router::CostRouter;
use crate::application::retry::RetryPolicy;
use crate::domain::cost::{CostRecord, Tier};
use crate::domain::events::StrategyEvent;
use crate::domain::node_config::{ConfigError, WorkersConfig};
use crate::domain::strategy::Strategy;
use crate::domain::task::{ExecutionReport, Task, TaskOutcome, TaskStatus};
use crate::domain::worker::{Artifact, TaskContext, Worker, WorkerError};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::workers::build_worker;

pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;

/// Tier → worker binding, fixed at startup
#[derive(Clone, Default)]
pub struct CapabilityMap {
    workers: BTreeMap<Tier, Arc<dyn Worker>>,
}

impl CapabilityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tier: Tier, worker: Arc<dyn Worker>) -> Self {
        self.register(tier, worker);
        self
    }

    pub fn register(&mut self, tier: Tier, worker: Arc<dyn Worker>) {
        info!(tier = %tier, worker = worker.name(), "Registered worker capability");
        self.workers.insert(tier, worker);
    }

    pub fn from_config(config: &WorkersConfig) -> Result<Self, ConfigError> {
        Ok(Self::new()
            .with(Tier::Local, build_worker(&config.local)?)
            .with(Tier::Cloud, build_worker(&config.cloud)?))
    }

    pub fn get(&self, tier: Tier) -> Option<Arc<dyn Worker>> {
        self.workers.get(&tier).cloned()
    }

    pub fn tiers(&self) -> BTreeSet<Tier> {
        self.workers.keys().copied().collect()
    }

    /// Tiers whose worker failed its health check
    pub async fn probe(&self) -> Vec<(Tier, WorkerError)> {
        let mut unhealthy = Vec::new();
        for (tier, worker) in &self.workers {
            if let Err(err) = worker.health_check().await {
                unhealthy.push((*tier, err));
            }
        }
        unhealthy
    }
}

pub struct ExecutionEngine {
    capabilities: CapabilityMap,
    router: Arc<CostRouter>,
    retry: RetryPolicy,
    pool_size: usize,
    event_bus: Option<Arc<EventBus>>,
    halt: CancellationToken,
    shutdown: CancellationToken,
}

struct Dispatched {
    index: usize,
    result: Result<Artifact, String>,
    attempts: u32,
}

impl ExecutionEngine {
    pub fn new(capabilities: CapabilityMap, router: Arc<CostRouter>, retry: RetryPolicy) -> Self {
        Self {
            capabilities,
            router,
            retry,
            pool_size: DEFAULT_WORKER_POOL_SIZE,
            event_bus: None,
            halt: CancellationToken::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_halt_token(mut self, halt: CancellationToken) -> Self {
        self.halt = halt;
        self
    }

    pub fn halt_token(&self) -> CancellationToken {
        self.halt.clone()
    }

    pub fn with_shutdown_token(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn capabilities(&self) -> &CapabilityMap {
        &self.capabilities
    }

    pub async fn execute(&self, strategy: &mut Strategy) -> ExecutionReport {
        let mut attempts: HashMap<usize, u32> = HashMap::new();
        let mut costs: HashMap<usize, f64> = HashMap::new();
        let mut waves = 0;
        let mut halted = false;
        let mut suspended = false;

        self.recover_interrupted(strategy);

        loop {
            if self.halt.is_cancelled() {
                halted = true;
                self.cancel_pending(strategy, "execution halted");
                error!(strategy_id = %strategy.id, "Execution halted; remaining tasks cancelled");
                break;
            }
            if self.shutdown.is_cancelled() {
                suspended = true;
                info!(strategy_id = %strategy.id, "Shutdown requested; undispatched tasks left pending");
                break;
            }

            let wave = self.eligible(strategy);
            if wave.is_empty() {
                break;
            }
            waves += 1;
            debug!(strategy_id = %strategy.id, wave = waves, tasks = wave.len(), "Dispatching wave");

            let mut join_set = JoinSet::new();
            for index in wave {
                self.dispatch(strategy, index, &mut join_set);
            }

            // Join barrier: the whole wave settles before the graph is re-evaluated
            while let Some(joined) = join_set.join_next().await {
                let dispatched = match joined {
                    Ok(dispatched) => dispatched,
                    Err(err) => {
                        error!(strategy_id = %strategy.id, error = %err, "Worker task panicked");
                        continue;
                    }
                };
                attempts.insert(dispatched.index, dispatched.attempts);
                if let Ok(artifact) = &dispatched.result {
                    costs.insert(dispatched.index, artifact.cost);
                }
                self.apply(strategy, dispatched);
            }

            // A panicked worker leaves its task Dispatched
            for index in 0..strategy.tasks.len() {
                if strategy.tasks[index].status == TaskStatus::Dispatched {
                    self.settle_failure(strategy, index, "worker panicked".to_string());
                }
            }
        }

        // Anything still Pending can never become eligible
        if !suspended {
            self.cancel_pending(strategy, "dependencies did not complete");
        }
        strategy.touch();

        let outcomes = strategy
            .tasks
            .iter()
            .enumerate()
            .map(|(index, task)| TaskOutcome {
                task_id: task.id,
                key: task.key.clone(),
                tier: task.assigned_tier,
                status: task.status,
                output: task.output.clone(),
                error: task.error.clone(),
                attempts: attempts.get(&index).copied().unwrap_or(0),
                cost: costs.get(&index).copied().unwrap_or(0.0),
            })
            .collect();

        let report = ExecutionReport { outcomes, waves, halted, suspended };
        info!(
            strategy_id = %strategy.id,
            waves,
            completed = report.count(TaskStatus::Completed),
            failed = report.count(TaskStatus::Failed),
            cancelled = report.count(TaskStatus::Cancelled),
            cost = report.total_cost(),
            halted,
            suspended,
            "Strategy execution finished"
        );
        report
    }

    /// Tasks left Dispatched by a crash have an unknown outcome and count as failed
    fn recover_interrupted(&self, strategy: &mut Strategy) {
        for index in 0..strategy.tasks.len() {
            if strategy.tasks[index].status == TaskStatus::Dispatched {
                warn!(strategy_id = %strategy.id, task = %strategy.tasks[index].key, "Task was interrupted mid-dispatch");
                self.settle_failure(strategy, index, "interrupted before completion".to_string());
            }
        }
        for index in 0..strategy.tasks.len() {
            if strategy.tasks[index].status == TaskStatus::Failed {
                self.cancel_dependents(strategy, index);
            }
        }
    }

    fn eligible(&self, strategy: &Strategy) -> Vec<usize> {
        let completed: BTreeSet<_> = strategy
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id)
            .collect();
        strategy
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.status == TaskStatus::Pending && t.dependencies.is_subset(&completed))
            .map(|(index, _)| index)
            .take(self.pool_size)
            .collect()
    }

    fn dispatch(&self, strategy: &mut Strategy, index: usize, join_set: &mut JoinSet<Dispatched>) {
        let upstream = strategy.tasks[index]
            .dependencies
            .iter()
            .filter_map(|dep| strategy.task(*dep))
            .map(|dep| (dep.key.clone(), dep.output.clone().unwrap_or_default()))
            .collect();
        let context = TaskContext {
            strategy_id: strategy.id,
            signal: strategy.signal.clone(),
            upstream,
        };

        let tier = strategy.tasks[index].assigned_tier;
        if strategy.tasks[index].dispatch().is_err() {
            return;
        }
        self.emit(strategy, index);
        metrics::counter!("vigil_tasks_dispatched_total", "tier" => tier.as_str()).increment(1);

        let task = strategy.tasks[index].clone();
        let Some(worker) = self.capabilities.get(tier) else {
            join_set.spawn(async move {
                Dispatched {
                    index,
                    result: Err(format!("no worker registered for tier '{}'", tier)),
                    attempts: 0,
                }
            });
            return;
        };

        let retry = self.retry.clone();
        join_set.spawn(async move {
            let operation = format!("{}:{}", worker.name(), task.key);
            let (result, attempts) = retry.run_counted(&operation, || worker.execute(&task, &context)).await;
            Dispatched {
                index,
                result: result.map_err(|e| e.to_string()),
                attempts,
            }
        });
    }

    fn apply(&self, strategy: &mut Strategy, dispatched: Dispatched) {
        let index = dispatched.index;
        match dispatched.result {
            Ok(artifact) => {
                let task = &strategy.tasks[index];
                let record = CostRecord::new(artifact.agent.clone(), task.assigned_tier, artifact.unit_count, artifact.cost);
                if let Err(err) = self.router.record_cost(record) {
                    warn!(strategy_id = %strategy.id, task = %task.key, error = %err, "Failed to record task cost");
                }
                if strategy.tasks[index].complete(artifact.content).is_ok() {
                    metrics::counter!("vigil_tasks_completed_total").increment(1);
                    debug!(strategy_id = %strategy.id, task = %strategy.tasks[index].key, attempts = dispatched.attempts, "Task completed");
                    self.emit(strategy, index);
                }
            }
            Err(reason) => self.settle_failure(strategy, index, reason),
        }
    }

    fn settle_failure(&self, strategy: &mut Strategy, index: usize, reason: String) {
        warn!(strategy_id = %strategy.id, task = %strategy.tasks[index].key, error = %reason, "Task failed");
        if strategy.tasks[index].fail(reason).is_ok() {
            metrics::counter!("vigil_tasks_failed_total").increment(1);
            self.emit(strategy, index);
        }
        self.cancel_dependents(strategy, index);
    }

    fn cancel_dependents(&self, strategy: &mut Strategy, index: usize) {
        let failed_key = strategy.tasks[index].key.clone();
        for dependent in strategy.dependents_of(strategy.tasks[index].id) {
            if strategy.tasks[dependent].status != TaskStatus::Pending {
                continue;
            }
            if strategy.tasks[dependent]
                .cancel(format!("dependency '{}' failed", failed_key))
                .is_ok()
            {
                debug!(strategy_id = %strategy.id, task = %strategy.tasks[dependent].key, cause = %failed_key, "Cancelled dependent task");
                metrics::counter!("vigil_tasks_cancelled_total").increment(1);
                self.emit(strategy, dependent);
            }
        }
    }

    fn cancel_pending(&self, strategy: &mut Strategy, reason: &str) {
        for index in 0..strategy.tasks.len() {
            if strategy.tasks[index].status == TaskStatus::Pending && strategy.tasks[index].cancel(reason).is_ok() {
                metrics::counter!("vigil_tasks_cancelled_total").increment(1);
                self.emit(strategy, index);
            }
        }
    }

    fn emit(&self, strategy: &Strategy, index: usize) {
        if let Some(bus) = &self.event_bus {
            let task: &Task = &strategy.tasks[index];
            bus.publish_strategy_event(StrategyEvent::TaskStatusChanged {
                strategy_id: strategy.id,
                task_id: task.id,
                key: task.key.clone(),
                status: task.status,
                changed_at: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dag_builder::DagBuilder;
    use crate::domain::node_config::RouterConfig;
    use crate::domain::strategy::{StrategyIntent, TaskSpec};
    use crate::domain::worker::WorkerError;
    use crate::domain::{Severity, Signal};
    use crate::infrastructure::event_bus::DomainEvent;
    use crate::infrastructure::workers::StubWorker;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    /// Records dispatch order and peak concurrency
    struct RecordingWorker {
        started: Mutex<Vec<String>>,
        running: AtomicUsize,
        peak: AtomicUsize,
        fail_keys: Vec<String>,
        cost: f64,
    }

    impl RecordingWorker {
        fn new(fail_keys: &[&str]) -> Self {
            Self {
                started: Mutex::new(Vec::new()),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail_keys: fail_keys.iter().map(|s| s.to_string()).collect(),
                cost: 0.25,
            }
        }
    }

    #[async_trait]
    impl Worker for RecordingWorker {
        async fn execute(&self, task: &Task, context: &TaskContext) -> Result<Artifact, WorkerError> {
            self.started.lock().push(task.key.clone());
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.fail_keys.contains(&task.key) {
                return Err(WorkerError::Rejected("boom".into()));
            }
            Ok(Artifact {
                content: format!("{} saw {:?}", task.key, context.upstream.keys().collect::<Vec<_>>()),
                agent: "recorder".into(),
                unit_count: 10,
                cost: self.cost,
            })
        }

        fn name(&self) -> &str {
            "recorder"
        }
    }

    fn router() -> Arc<CostRouter> {
        Arc::new(CostRouter::new(&RouterConfig::default()))
    }

    fn strategy(router: &Arc<CostRouter>, specs: Vec<TaskSpec>) -> Strategy {
        DagBuilder::new(router.clone(), [Tier::Local].into_iter().collect())
            .build(StrategyIntent {
                correlation_id: Uuid::new_v4(),
                signal: Signal::new("ci", "build", Severity::Low, json!({})),
                tasks: specs,
            })
            .unwrap()
    }

    fn engine(router: &Arc<CostRouter>, worker: Arc<dyn Worker>) -> ExecutionEngine {
        let retry = RetryPolicy::new(Duration::from_secs(2)).with_backoff(Duration::from_millis(1));
        ExecutionEngine::new(CapabilityMap::new().with(Tier::Local, worker), router.clone(), retry)
    }

    #[tokio::test]
    async fn test_dependencies_complete_before_dispatch() {
        let router = router();
        let worker = Arc::new(RecordingWorker::new(&[]));
        let mut strategy = strategy(
            &router,
            vec![
                TaskSpec::new("diagnose", ""),
                TaskSpec::new("fix_a", "").after(["diagnose"]),
                TaskSpec::new("fix_b", "").after(["diagnose"]),
                TaskSpec::new("integrate", "").after(["fix_a", "fix_b"]),
            ],
        );

        let report = engine(&router, worker.clone()).execute(&mut strategy).await;

        assert_eq!(report.waves, 3);
        assert_eq!(report.count(TaskStatus::Completed), 4);
        let started = worker.started.lock().clone();
        assert_eq!(started[0], "diagnose");
        assert_eq!(started[3], "integrate");
        assert!(report.outcome("integrate").unwrap().output.as_ref().unwrap().contains("fix_a"));
        assert_eq!(report.outcome("diagnose").unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_failure_cancels_only_transitive_dependents() {
        let router = router();
        let worker = Arc::new(RecordingWorker::new(&["fix_a"]));
        let mut strategy = strategy(
            &router,
            vec![
                TaskSpec::new("diagnose", ""),
                TaskSpec::new("fix_a", "").after(["diagnose"]),
                TaskSpec::new("fix_b", "").after(["diagnose"]),
                TaskSpec::new("test_a", "").after(["fix_a"]),
                TaskSpec::new("integrate", "").after(["test_a", "fix_b"]),
            ],
        );

        let report = engine(&router, worker.clone()).execute(&mut strategy).await;

        assert_eq!(report.outcome("fix_a").unwrap().status, TaskStatus::Failed);
        assert_eq!(report.outcome("fix_b").unwrap().status, TaskStatus::Completed);
        assert_eq!(report.outcome("test_a").unwrap().status, TaskStatus::Cancelled);
        assert_eq!(report.outcome("integrate").unwrap().status, TaskStatus::Cancelled);
        assert_eq!(report.outcome("integrate").unwrap().attempts, 0);
        assert!(!worker.started.lock().contains(&"test_a".to_string()));
    }

    #[tokio::test]
    async fn test_wave_size_is_bounded_by_pool() {
        let router = router();
        let worker = Arc::new(RecordingWorker::new(&[]));
        let specs: Vec<TaskSpec> = (0..6).map(|i| TaskSpec::new(format!("t{}", i), "")).collect();
        let mut strategy = strategy(&router, specs);

        let report = engine(&router, worker.clone()).with_pool_size(2).execute(&mut strategy).await;

        assert_eq!(report.waves, 3);
        assert!(worker.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(*worker.started.lock(), vec!["t0", "t1", "t2", "t3", "t4", "t5"]);
    }

    #[tokio::test]
    async fn test_costs_are_recorded_in_ledger() {
        let router = router();
        let worker = Arc::new(RecordingWorker::new(&[]));
        let mut strategy = strategy(&router, vec![TaskSpec::new("a", ""), TaskSpec::new("b", "")]);

        let report = engine(&router, worker).execute(&mut strategy).await;

        assert_eq!(router.ledger().len(), 2);
        assert!((router.total() - 0.5).abs() < 1e-9);
        assert!((report.total_cost() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_halt_cancels_remaining_tasks() {
        let router = router();
        let worker = Arc::new(RecordingWorker::new(&[]));
        let mut strategy = strategy(&router, vec![TaskSpec::new("a", ""), TaskSpec::new("b", "").after(["a"])]);

        let engine = engine(&router, worker.clone());
        engine.halt_token().cancel();
        let report = engine.execute(&mut strategy).await;

        assert!(report.halted);
        assert_eq!(report.count(TaskStatus::Cancelled), 2);
        assert!(worker.started.lock().is_empty());
    }

    /// Requests a graceful shutdown while running its first task
    struct StoppingWorker {
        shutdown: CancellationToken,
    }

    #[async_trait]
    impl Worker for StoppingWorker {
        async fn execute(&self, task: &Task, _context: &TaskContext) -> Result<Artifact, WorkerError> {
            self.shutdown.cancel();
            Ok(Artifact::free("stopper", task.key.clone()))
        }

        fn name(&self) -> &str {
            "stopper"
        }
    }

    #[tokio::test]
    async fn test_shutdown_leaves_remaining_tasks_pending() {
        let router = router();
        let shutdown = CancellationToken::new();
        let mut strategy = strategy(&router, vec![TaskSpec::new("a", ""), TaskSpec::new("b", "").after(["a"])]);

        let report = engine(&router, Arc::new(StoppingWorker { shutdown: shutdown.clone() }))
            .with_shutdown_token(shutdown)
            .execute(&mut strategy)
            .await;

        assert!(report.suspended);
        assert!(!report.halted);
        assert_eq!(report.outcome("a").unwrap().status, TaskStatus::Completed);
        assert_eq!(report.outcome("b").unwrap().status, TaskStatus::Pending);
        assert_eq!(report.count(TaskStatus::Cancelled), 0);

        // A fresh engine picks up where the suspended one stopped
        let worker = Arc::new(RecordingWorker::new(&[]));
        let resumed = engine(&router, worker.clone()).execute(&mut strategy).await;
        assert!(!resumed.suspended);
        assert_eq!(resumed.count(TaskStatus::Completed), 2);
        assert_eq!(*worker.started.lock(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_interrupted_dispatch_is_failed_on_resume() {
        let router = router();
        let worker = Arc::new(RecordingWorker::new(&[]));
        let mut strategy = strategy(&router, vec![TaskSpec::new("a", ""), TaskSpec::new("b", "").after(["a"])]);
        strategy.tasks[0].dispatch().unwrap();

        let report = engine(&router, worker.clone()).execute(&mut strategy).await;

        assert_eq!(report.outcome("a").unwrap().status, TaskStatus::Failed);
        assert_eq!(report.outcome("b").unwrap().status, TaskStatus::Cancelled);
        assert!(worker.started.lock().is_empty());
    }

    #[tokio::test]
    async fn test_status_changes_are_published() {
        let router = router();
        let bus = Arc::new(EventBus::with_default_capacity());
        let mut receiver = bus.subscribe();
        let mut strategy = strategy(&router, vec![TaskSpec::new("only", "")]);

        engine(&router, Arc::new(StubWorker::new("stub")))
            .with_event_bus(bus.clone())
            .execute(&mut strategy)
            .await;

        let mut statuses = Vec::new();
        while let Ok(DomainEvent::Strategy(StrategyEvent::TaskStatusChanged { status, .. })) = receiver.try_recv() {
            statuses.push(status);
        }
        assert_eq!(statuses, vec![TaskStatus::Dispatched, TaskStatus::Completed]);
    }
}
