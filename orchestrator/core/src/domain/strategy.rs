// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Strategy Aggregate
//!
//! A validated plan: an insertion-ordered list of [`Task`]s whose dependency
//! edges form a DAG. Cognition authors it; once published, the action stage
//! owns its execution.
//!
//! Strategy-level lifecycle:
//!
//! ```text
//! Planned ──► Executing ──► Verifying ──► Completed   (verification passed)
//!                                    └──► Failed      (anything else)
//! ```
//!
//! A strategy is `Completed` **iff** its latest [`VerificationResult`] passed.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::cost::Tier;
use crate::domain::task::{Task, TaskId, TaskStatus};
use crate::domain::verification::VerificationResult;
use crate::domain::Signal;

/// Namespace for strategy ids derived from correlation ids
const STRATEGY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1d_2c3a_9b47_4e0c_8d55_31a7_c2e9_04b1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StrategyId(pub Uuid);

impl StrategyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The strategy planned for a correlation id. Redelivered signals map to
    /// the same id, which is what makes planning idempotent.
    pub fn for_correlation(correlation_id: Uuid) -> Self {
        Self(Uuid::new_v5(&STRATEGY_NAMESPACE, correlation_id.as_bytes()))
    }
}

impl Default for StrategyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for StrategyId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(StrategyId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyStatus {
    Planned,
    Executing,
    Verifying,
    Completed,
    Failed,
}

impl StrategyStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StrategyStatus::Completed | StrategyStatus::Failed)
    }
}

/// One task as proposed by a planner, before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub key: String,
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Overrides the signal's estimated complexity for tier selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<f64>,
}

impl TaskSpec {
    pub fn new(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            depends_on: Vec::new(),
            complexity: None,
        }
    }

    pub fn after<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn with_complexity(mut self, complexity: f64) -> Self {
        self.complexity = Some(complexity);
        self
    }
}

/// Unvalidated plan handed to the DAG builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyIntent {
    pub correlation_id: Uuid,
    pub signal: Signal,
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DagValidationError {
    #[error("Strategy has no tasks")]
    Empty,

    #[error("Strategy has {count} tasks, more than the allowed {max}")]
    TooManyTasks { count: usize, max: usize },

    #[error("Duplicate task key '{0}'")]
    DuplicateKey(String),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Task '{0}' depends on itself")]
    SelfDependency(String),

    #[error("Dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("No worker capability serves tier '{tier}' required by task '{task}'")]
    UnresolvableTier { task: String, tier: Tier },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: StrategyId,
    pub correlation_id: Uuid,
    pub signal: Signal,
    /// Insertion order is the dispatch tie-break
    pub tasks: Vec<Task>,
    pub status: StrategyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    /// Set once the learning loop has folded this outcome into pattern memory
    #[serde(default)]
    pub learning_recorded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Strategy {
    pub fn new(correlation_id: Uuid, signal: Signal, tasks: Vec<Task>) -> Self {
        let now = Utc::now();
        Self {
            id: StrategyId::for_correlation(correlation_id),
            correlation_id,
            signal,
            tasks,
            status: StrategyStatus::Planned,
            verification: None,
            learning_recorded: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_by_key(&self, key: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.key == key)
    }

    /// `(dependency, dependent)` pairs
    pub fn edges(&self) -> Vec<(TaskId, TaskId)> {
        self.tasks
            .iter()
            .flat_map(|t| t.dependencies.iter().map(move |d| (*d, t.id)))
            .collect()
    }

    /// Deterministic topological order (insertion order breaks ties)
    pub fn execution_order(&self) -> Vec<TaskId> {
        match topological_order(&self.tasks) {
            Ok(order) => order.into_iter().map(|i| self.tasks[i].id).collect(),
            // Built strategies are acyclic; fall back to insertion order
            Err(_) => self.tasks.iter().map(|t| t.id).collect(),
        }
    }

    /// Indices of every task that transitively depends on `id`
    pub fn dependents_of(&self, id: TaskId) -> Vec<usize> {
        let mut reverse: HashMap<TaskId, Vec<usize>> = HashMap::new();
        for (idx, task) in self.tasks.iter().enumerate() {
            for dep in &task.dependencies {
                reverse.entry(*dep).or_default().push(idx);
            }
        }

        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for &idx in reverse.get(&current).map(Vec::as_slice).unwrap_or(&[]) {
                if seen.insert(idx) {
                    queue.push_back(self.tasks[idx].id);
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Keys of tasks that are neither terminal nor cancelled
    pub fn unfinished_tasks(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| !t.status.is_terminal())
            .map(|t| t.key.clone())
            .collect()
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn mark_executing(&mut self) {
        if !self.is_terminal() {
            self.status = StrategyStatus::Executing;
            self.touch();
        }
    }

    pub fn mark_verifying(&mut self) {
        if !self.is_terminal() {
            self.status = StrategyStatus::Verifying;
            self.touch();
        }
    }

    /// Store the verification result; the strategy completes only if it passed
    pub fn record_verification(&mut self, result: VerificationResult) {
        self.status = if result.passed {
            StrategyStatus::Completed
        } else {
            StrategyStatus::Failed
        };
        self.verification = Some(result);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Kahn's algorithm over task indices.
///
/// Ready tasks are taken lowest insertion index first. On a cycle, returns
/// the keys along one cycle (first key repeated at the end).
pub fn topological_order(tasks: &[Task]) -> Result<Vec<usize>, Vec<String>> {
    let index: HashMap<TaskId, usize> = tasks.iter().enumerate().map(|(i, t)| (t.id, i)).collect();
    let mut in_degree = vec![0usize; tasks.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];

    for (i, task) in tasks.iter().enumerate() {
        for dep in &task.dependencies {
            if let Some(&d) = index.get(dep) {
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..tasks.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(tasks.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &child in &dependents[next] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.insert(child);
            }
        }
    }

    if order.len() == tasks.len() {
        return Ok(order);
    }

    let remaining: BTreeSet<usize> = (0..tasks.len()).filter(|&i| in_degree[i] > 0).collect();
    Err(find_cycle(tasks, &index, &remaining))
}

/// Walk dependency edges inside the unresolved set until a node repeats
fn find_cycle(tasks: &[Task], index: &HashMap<TaskId, usize>, remaining: &BTreeSet<usize>) -> Vec<String> {
    let Some(&start) = remaining.iter().next() else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut current = start;
    loop {
        let next = tasks[current]
            .dependencies
            .iter()
            .filter_map(|d| index.get(d).copied())
            .find(|i| remaining.contains(i));
        let Some(next) = next else {
            break;
        };
        if let Some(pos) = path.iter().position(|&p| p == next) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|&i| tasks[i].key.clone()).collect();
            cycle.push(tasks[next].key.clone());
            return cycle;
        }
        path.push(next);
        current = next;
    }
    path.into_iter().map(|i| tasks[i].key.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;
    use serde_json::json;

    fn build(edges: &[(&str, &[&str])]) -> Strategy {
        let signal = Signal::new("test", "unit", Severity::Low, json!({}));
        let correlation = signal.id.0;
        let id = StrategyId::for_correlation(correlation);
        let tasks = edges
            .iter()
            .map(|(key, deps)| {
                let deps = deps.iter().map(|d| TaskId::derive(id, d)).collect();
                Task::new(TaskId::derive(id, key), *key, *key, deps, Tier::Local)
            })
            .collect();
        Strategy::new(correlation, signal, tasks)
    }

    #[test]
    fn test_strategy_id_is_derived_from_correlation() {
        let correlation = Uuid::new_v4();
        assert_eq!(StrategyId::for_correlation(correlation), StrategyId::for_correlation(correlation));
        assert_ne!(StrategyId::for_correlation(correlation), StrategyId::for_correlation(Uuid::new_v4()));
    }

    #[test]
    fn test_execution_order_uses_insertion_tie_break() {
        let strategy = build(&[("c", &[]), ("a", &[]), ("b", &["c"]), ("d", &["a", "b"])]);
        let keys: Vec<&str> = strategy
            .execution_order()
            .into_iter()
            .map(|id| strategy.task(id).unwrap().key.as_str())
            .collect();
        assert_eq!(keys, vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn test_cycle_is_reported_with_path() {
        let strategy = build(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"]), ("d", &[])]);
        let cycle = topological_order(&strategy.tasks).unwrap_err();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        assert!(!cycle.contains(&"d".to_string()));
    }

    #[test]
    fn test_dependents_are_transitive() {
        let strategy = build(&[("a", &[]), ("b", &["a"]), ("c", &["b"]), ("e", &[])]);
        let a = strategy.task_by_key("a").unwrap().id;
        let dependents: Vec<&str> = strategy
            .dependents_of(a)
            .into_iter()
            .map(|i| strategy.tasks[i].key.as_str())
            .collect();
        assert_eq!(dependents, vec!["b", "c"]);
    }

    #[test]
    fn test_record_verification_controls_completion() {
        let mut strategy = build(&[("a", &[])]);
        strategy.record_verification(VerificationResult::failed("1 test failed", vec!["t".into()]));
        assert_eq!(strategy.status, StrategyStatus::Failed);
        strategy.record_verification(VerificationResult::passed("ok"));
        assert_eq!(strategy.status, StrategyStatus::Completed);
    }

    #[test]
    fn test_edges() {
        let strategy = build(&[("a", &[]), ("b", &["a"])]);
        let a = strategy.task_by_key("a").unwrap().id;
        let b = strategy.task_by_key("b").unwrap().id;
        assert_eq!(strategy.edges(), vec![(a, b)]);
    }
}
