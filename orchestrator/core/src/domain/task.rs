// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Aggregate
//!
//! A task is one node of a strategy's DAG. Its state machine is:
//!
//! ```text
//! Pending ──► Dispatched ──► Completed
//!    │                  └──► Failed
//!    └──► Cancelled            (only via failure propagation or halt)
//! ```
//!
//! Terminal states are never left: a cancelled or failed task is not
//! resurrected.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::cost::Tier;
use crate::domain::strategy::StrategyId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Deterministic id for `key` within a strategy, so identical plans
    /// produce identical graphs.
    pub fn derive(strategy_id: StrategyId, key: &str) -> Self {
        Self(Uuid::new_v5(&strategy_id.0, key.as_bytes()))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Dispatched,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Dispatched => "dispatched",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("Invalid task transition for {task}: {from} -> {to}")]
pub struct TaskTransitionError {
    pub task: String,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Human-readable key, unique within the strategy
    pub key: String,
    pub description: String,
    pub dependencies: BTreeSet<TaskId>,
    pub assigned_tier: Tier,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        id: TaskId,
        key: impl Into<String>,
        description: impl Into<String>,
        dependencies: BTreeSet<TaskId>,
        assigned_tier: Tier,
    ) -> Self {
        Self {
            id,
            key: key.into(),
            description: description.into(),
            dependencies,
            assigned_tier,
            status: TaskStatus::Pending,
            output: None,
            error: None,
            dispatched_at: None,
            finished_at: None,
        }
    }

    pub fn dispatch(&mut self) -> Result<(), TaskTransitionError> {
        self.transition(TaskStatus::Pending, TaskStatus::Dispatched)?;
        self.dispatched_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self, output: String) -> Result<(), TaskTransitionError> {
        self.transition(TaskStatus::Dispatched, TaskStatus::Completed)?;
        self.output = Some(output);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TaskTransitionError> {
        self.transition(TaskStatus::Dispatched, TaskStatus::Failed)?;
        self.error = Some(reason.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), TaskTransitionError> {
        self.transition(TaskStatus::Pending, TaskStatus::Cancelled)?;
        self.error = Some(reason.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, expected: TaskStatus, to: TaskStatus) -> Result<(), TaskTransitionError> {
        if self.status != expected {
            return Err(TaskTransitionError {
                task: self.key.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Per-task result reported by the execution engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub key: String,
    pub tier: Tier,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Worker invocations including retries; zero when never dispatched
    pub attempts: u32,
    pub cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub outcomes: Vec<TaskOutcome>,
    pub waves: usize,
    /// Dispatch stopped early because of a fatal halt
    pub halted: bool,
    /// Dispatch stopped for a graceful shutdown; undispatched tasks stay Pending
    #[serde(default)]
    pub suspended: bool,
}

impl ExecutionReport {
    pub fn outcome(&self, key: &str) -> Option<&TaskOutcome> {
        self.outcomes.iter().find(|o| o.key == key)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Fraction of tasks that completed, in `[0, 1]`
    pub fn completed_ratio(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        self.count(TaskStatus::Completed) as f64 / self.outcomes.len() as f64
    }

    pub fn total_cost(&self) -> f64 {
        self.outcomes.iter().map(|o| o.cost).sum()
    }
}
