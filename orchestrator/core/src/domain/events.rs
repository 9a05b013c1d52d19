// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::cost::BudgetEvent;
use crate::domain::strategy::StrategyId;
use crate::domain::task::{TaskId, TaskStatus};
use crate::domain::Signal;

/// Strategy lifecycle events (in-process observability)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StrategyEvent {
    StrategyPlanned {
        strategy_id: StrategyId,
        correlation_id: Uuid,
        task_count: usize,
        planned_at: DateTime<Utc>,
    },
    TaskStatusChanged {
        strategy_id: StrategyId,
        task_id: TaskId,
        key: String,
        status: TaskStatus,
        changed_at: DateTime<Utc>,
    },
    StrategyVerified {
        strategy_id: StrategyId,
        passed: bool,
        failing_checks: Vec<String>,
        verified_at: DateTime<Utc>,
    },
}

impl StrategyEvent {
    pub fn strategy_id(&self) -> StrategyId {
        match self {
            StrategyEvent::StrategyPlanned { strategy_id, .. } => *strategy_id,
            StrategyEvent::TaskStatusChanged { strategy_id, .. } => *strategy_id,
            StrategyEvent::StrategyVerified { strategy_id, .. } => *strategy_id,
        }
    }
}

/// Published on the `outcomes` topic by the action stage once a strategy is
/// terminal. Carries enough detail for cognition to learn and re-plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub strategy_id: StrategyId,
    pub correlation_id: Uuid,
    pub signal: Signal,
    pub passed: bool,
    pub completed_ratio: f64,
    pub failing_checks: Vec<String>,
    pub detail: String,
    pub verified_at: DateTime<Utc>,
}

/// Operator-facing notices published on the `advisories` topic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Advisory {
    /// Cognition refused to publish a plan; never retried
    PlanRejected {
        correlation_id: Uuid,
        reason: String,
        rejected_at: DateTime<Utc>,
    },
    /// Verification failed; cognition should plan again with the failing checks
    ReplanRequested {
        strategy_id: StrategyId,
        correlation_id: Uuid,
        failing_checks: Vec<String>,
        detail: String,
        requested_at: DateTime<Utc>,
    },
    Budget { event: BudgetEvent },
    FatalHalt {
        reason: String,
        halted_at: DateTime<Utc>,
    },
}

impl Advisory {
    pub fn advisory_type(&self) -> &'static str {
        match self {
            Advisory::PlanRejected { .. } => "plan_rejected",
            Advisory::ReplanRequested { .. } => "replan_requested",
            Advisory::Budget { .. } => "budget",
            Advisory::FatalHalt { .. } => "fatal_halt",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advisory_is_tagged() {
        let advisory = Advisory::ReplanRequested {
            strategy_id: StrategyId::new(),
            correlation_id: Uuid::new_v4(),
            failing_checks: vec!["parser::rejects_empty".into()],
            detail: "1 failed".into(),
            requested_at: Utc::now(),
        };
        let json = serde_json::to_value(&advisory).unwrap();
        assert_eq!(json["type"], "replan_requested");
        assert_eq!(advisory.advisory_type(), "replan_requested");
    }
}
