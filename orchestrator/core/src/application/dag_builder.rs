// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # DAG Builder
//!
//! Turns a planner's [`StrategyIntent`] into a validated [`Strategy`].
//!
//! Checks, in order: non-empty, bounded size, unique task keys, every
//! dependency resolves inside the graph, no self-loops, every task's tier is
//! served by a registered worker, and finally acyclicity via Kahn's
//! algorithm (the offending cycle is reported). Task ids are derived from
//! the strategy id and task key, so building the same intent twice yields
//! the same graph.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::application::cost_router::CostRouter;
use crate::domain::cost::Tier;
use crate::domain::strategy::{topological_order, DagValidationError, Strategy, StrategyId, StrategyIntent};
use crate::domain::task::{Task, TaskId};

pub const DEFAULT_MAX_TASKS: usize = 32;

pub struct DagBuilder {
    router: Arc<CostRouter>,
    available_tiers: BTreeSet<Tier>,
    max_tasks: usize,
}

impl DagBuilder {
    pub fn new(router: Arc<CostRouter>, available_tiers: BTreeSet<Tier>) -> Self {
        Self {
            router,
            available_tiers,
            max_tasks: DEFAULT_MAX_TASKS,
        }
    }

    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks.max(1);
        self
    }

    pub fn build(&self, intent: StrategyIntent) -> Result<Strategy, DagValidationError> {
        let StrategyIntent { correlation_id, signal, tasks: specs } = intent;

        if specs.is_empty() {
            return Err(DagValidationError::Empty);
        }
        if specs.len() > self.max_tasks {
            return Err(DagValidationError::TooManyTasks {
                count: specs.len(),
                max: self.max_tasks,
            });
        }

        let mut seen = HashSet::with_capacity(specs.len());
        for spec in &specs {
            if !seen.insert(spec.key.as_str()) {
                return Err(DagValidationError::DuplicateKey(spec.key.clone()));
            }
        }

        let strategy_id = StrategyId::for_correlation(correlation_id);
        let ids: HashMap<&str, TaskId> = specs
            .iter()
            .map(|s| (s.key.as_str(), TaskId::derive(strategy_id, &s.key)))
            .collect();

        let signal_complexity = signal.estimated_complexity();
        let mut tasks = Vec::with_capacity(specs.len());
        for spec in &specs {
            let mut dependencies = BTreeSet::new();
            for dep in &spec.depends_on {
                if dep == &spec.key {
                    return Err(DagValidationError::SelfDependency(spec.key.clone()));
                }
                let id = ids.get(dep.as_str()).ok_or_else(|| DagValidationError::UnknownDependency {
                    task: spec.key.clone(),
                    dependency: dep.clone(),
                })?;
                dependencies.insert(*id);
            }

            let complexity = spec.complexity.unwrap_or(signal_complexity);
            let tier = self.router.tier_for(signal.severity, complexity);
            if !self.available_tiers.contains(&tier) {
                return Err(DagValidationError::UnresolvableTier {
                    task: spec.key.clone(),
                    tier,
                });
            }

            debug!(task = %spec.key, tier = %tier, complexity, "Assigned tier");
            tasks.push(Task::new(
                ids[spec.key.as_str()],
                spec.key.clone(),
                spec.description.clone(),
                dependencies,
                tier,
            ));
        }

        topological_order(&tasks).map_err(|path| DagValidationError::Cycle { path })?;

        let strategy = Strategy::new(correlation_id, signal, tasks);
        info!(
            strategy_id = %strategy.id,
            correlation_id = %correlation_id,
            tasks = strategy.tasks.len(),
            edges = strategy.edges().len(),
            "Built strategy DAG"
        );
        Ok(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::node_config::RouterConfig;
    use crate::domain::strategy::TaskSpec;
    use crate::domain::{Severity, Signal};
    use serde_json::json;
    use uuid::Uuid;

    fn builder(tiers: &[Tier]) -> DagBuilder {
        let router = Arc::new(CostRouter::new(&RouterConfig::default()));
        DagBuilder::new(router, tiers.iter().copied().collect())
    }

    fn intent(severity: Severity, tasks: Vec<TaskSpec>) -> StrategyIntent {
        StrategyIntent {
            correlation_id: Uuid::new_v4(),
            signal: Signal::new("ci", "build", severity, json!({"message": "compile error"})),
            tasks,
        }
    }

    #[test]
    fn test_builds_diamond_in_deterministic_order() {
        let intent = intent(
            Severity::Low,
            vec![
                TaskSpec::new("diagnose", "find root cause"),
                TaskSpec::new("fix_a", "patch module a").after(["diagnose"]),
                TaskSpec::new("fix_b", "patch module b").after(["diagnose"]),
                TaskSpec::new("integrate", "merge fixes").after(["fix_a", "fix_b"]),
            ],
        );
        let strategy = builder(&[Tier::Local]).build(intent.clone()).unwrap();

        let keys: Vec<&str> = strategy
            .execution_order()
            .into_iter()
            .filter_map(|id| strategy.task(id).map(|t| t.key.as_str()))
            .collect();
        assert_eq!(keys, vec!["diagnose", "fix_a", "fix_b", "integrate"]);
        assert_eq!(strategy.edges().len(), 4);

        let again = builder(&[Tier::Local]).build(intent).unwrap();
        assert_eq!(again.id, strategy.id);
        assert_eq!(again.tasks[3].id, strategy.tasks[3].id);
    }

    #[test]
    fn test_rejects_cycle_with_path() {
        let intent = intent(
            Severity::Low,
            vec![
                TaskSpec::new("a", "").after(["c"]),
                TaskSpec::new("b", "").after(["a"]),
                TaskSpec::new("c", "").after(["b"]),
            ],
        );
        match builder(&[Tier::Local]).build(intent) {
            Err(DagValidationError::Cycle { path }) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_structural_errors() {
        let b = builder(&[Tier::Local]);
        assert_eq!(b.build(intent(Severity::Low, vec![])).unwrap_err(), DagValidationError::Empty);
        assert_eq!(
            b.build(intent(Severity::Low, vec![TaskSpec::new("a", ""), TaskSpec::new("a", "")])).unwrap_err(),
            DagValidationError::DuplicateKey("a".into())
        );
        assert_eq!(
            b.build(intent(Severity::Low, vec![TaskSpec::new("a", "").after(["a"])])).unwrap_err(),
            DagValidationError::SelfDependency("a".into())
        );
        assert_eq!(
            b.build(intent(Severity::Low, vec![TaskSpec::new("a", "").after(["ghost"])])).unwrap_err(),
            DagValidationError::UnknownDependency { task: "a".into(), dependency: "ghost".into() }
        );
    }

    #[test]
    fn test_bounded_fan_out() {
        let specs: Vec<TaskSpec> = (0..5).map(|i| TaskSpec::new(format!("t{}", i), "")).collect();
        let err = builder(&[Tier::Local]).with_max_tasks(4).build(intent(Severity::Low, specs)).unwrap_err();
        assert_eq!(err, DagValidationError::TooManyTasks { count: 5, max: 4 });
    }

    #[test]
    fn test_unserved_tier_is_rejected() {
        // HIGH severity routes to the cloud tier, which has no worker here
        let err = builder(&[Tier::Local])
            .build(intent(Severity::High, vec![TaskSpec::new("fix", "")]))
            .unwrap_err();
        assert_eq!(err, DagValidationError::UnresolvableTier { task: "fix".into(), tier: Tier::Cloud });
    }

    #[test]
    fn test_task_complexity_hint_overrides_signal() {
        let strategy = builder(&[Tier::Local, Tier::Cloud])
            .build(intent(
                Severity::Medium,
                vec![TaskSpec::new("easy", "").with_complexity(0.1), TaskSpec::new("hard", "").with_complexity(0.9)],
            ))
            .unwrap();
        assert_eq!(strategy.tasks[0].assigned_tier, Tier::Local);
        assert_eq!(strategy.tasks[1].assigned_tier, Tier::Cloud);
    }
}
