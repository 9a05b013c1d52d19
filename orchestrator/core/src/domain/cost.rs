// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Cost and tier value types shared by the router, the DAG builder and the
//! execution engine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cost/capability class a task executes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Local, cheap model
    Local,
    /// Cloud, expensive model
    Cloud,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::Cloud => "cloud",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Tier::Local),
            "cloud" => Ok(Tier::Cloud),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

/// One append-only ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub agent: String,
    pub tier: Tier,
    pub unit_count: u64,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
}

impl CostRecord {
    pub fn new(agent: impl Into<String>, tier: Tier, unit_count: u64, cost: f64) -> Self {
        Self {
            agent: agent.into(),
            tier,
            unit_count,
            cost,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BudgetStatus {
    Ok,
    BudgetExceeded { spent: f64, ceiling: f64 },
}

impl BudgetStatus {
    pub fn is_exceeded(&self) -> bool {
        matches!(self, BudgetStatus::BudgetExceeded { .. })
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CostError {
    #[error("Cost must be a finite, non-negative number (got {0})")]
    InvalidCost(f64),

    #[error("Budget ceiling must be a finite, non-negative number (got {0})")]
    InvalidCeiling(f64),

    #[error("Ledger persistence failed: {0}")]
    Storage(String),
}

/// Advisory emitted when the budget latch changes state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BudgetEvent {
    BudgetExceeded {
        spent: f64,
        ceiling: f64,
        exceeded_at: DateTime<Utc>,
    },
    BudgetRestored {
        reason: BudgetRestoreReason,
        spent: f64,
        ceiling: f64,
        restored_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetRestoreReason {
    CeilingRaised,
    PeriodReset,
}
