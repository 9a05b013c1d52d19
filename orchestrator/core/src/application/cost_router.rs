// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cost Router
//!
//! Maps a signal to a model tier and keeps the spend ledger.
//!
//! ## Tier selection
//!
//! | Severity | Tier |
//! |----------|------|
//! | CRITICAL, HIGH | cloud |
//! | MEDIUM | cloud iff estimated complexity > threshold, else local |
//! | LOW | local |
//!
//! While the budget is exceeded every selection is local. This is hard
//! backpressure: the DAG builder asks the router for each task's tier, so no
//! new cloud assignment can be made until the ceiling is raised or the
//! accounting period is reset.
//!
//! ## Ledger
//!
//! All ledger state sits behind one mutex, so a budget check always observes
//! every previously recorded cost. The lifetime total is the sum of all rows
//! and never decreases; the per-period spend is what the ceiling applies to.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::cost::{BudgetEvent, BudgetRestoreReason, BudgetStatus, CostError, CostRecord, Tier};
use crate::domain::errors::OrchestratorError;
use crate::domain::node_config::RouterConfig;
use crate::domain::{Severity, Signal};
use crate::infrastructure::event_bus::EventBus;

const LEDGER_TREE: &str = "ledger";
const ROW_PREFIX: &[u8] = b"row/";
const PERIOD_KEY: &[u8] = b"meta/period_started";

struct Ledger {
    rows: Vec<CostRecord>,
    lifetime_total: f64,
    period_spend: f64,
    period_started: DateTime<Utc>,
    ceiling: f64,
    exceeded: bool,
}

impl Ledger {
    fn status(&self) -> BudgetStatus {
        if self.exceeded {
            BudgetStatus::BudgetExceeded {
                spent: self.period_spend,
                ceiling: self.ceiling,
            }
        } else {
            BudgetStatus::Ok
        }
    }
}

/// Structured ledger export
#[derive(Debug, Clone, Serialize)]
pub struct LedgerExport {
    pub total: f64,
    pub period_spend: f64,
    pub period_started: DateTime<Utc>,
    pub ceiling: f64,
    pub budget: BudgetStatus,
    pub rows: Vec<CostRecord>,
}

pub struct CostRouter {
    medium_threshold: f64,
    ledger: Mutex<Ledger>,
    store: Option<sled::Tree>,
    event_bus: Option<Arc<EventBus>>,
}

impl CostRouter {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            medium_threshold: config.medium_complexity_threshold,
            ledger: Mutex::new(Ledger {
                rows: Vec::new(),
                lifetime_total: 0.0,
                period_spend: 0.0,
                period_started: Utc::now(),
                ceiling: config.budget_ceiling,
                exceeded: false,
            }),
            store: None,
            event_bus: None,
        }
    }

    /// Router whose ledger rows are persisted in `db` and reloaded on open
    pub fn open_persistent(config: &RouterConfig, db: &sled::Db) -> Result<Self, CostError> {
        let tree = db.open_tree(LEDGER_TREE).map_err(|e| CostError::Storage(e.to_string()))?;

        let mut rows = Vec::new();
        for entry in tree.scan_prefix(ROW_PREFIX) {
            let (_, bytes) = entry.map_err(|e| CostError::Storage(e.to_string()))?;
            let row: CostRecord = serde_json::from_slice(&bytes).map_err(|e| CostError::Storage(e.to_string()))?;
            rows.push(row);
        }

        let period_started: DateTime<Utc> = match tree.get(PERIOD_KEY).map_err(|e| CostError::Storage(e.to_string()))? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| CostError::Storage(e.to_string()))?,
            None => {
                // First period covers everything already recorded
                let started = rows.iter().map(|r| r.timestamp).min().unwrap_or_else(Utc::now);
                let bytes = serde_json::to_vec(&started).map_err(|e| CostError::Storage(e.to_string()))?;
                tree.insert(PERIOD_KEY, bytes).map_err(|e| CostError::Storage(e.to_string()))?;
                started
            }
        };

        let lifetime_total = rows.iter().map(|r| r.cost).sum();
        let period_spend = rows
            .iter()
            .filter(|r| r.timestamp >= period_started)
            .map(|r| r.cost)
            .sum::<f64>();
        let exceeded = period_spend > config.budget_ceiling;

        info!(rows = rows.len(), total = lifetime_total, period_spend, "Loaded cost ledger");

        Ok(Self {
            medium_threshold: config.medium_complexity_threshold,
            ledger: Mutex::new(Ledger {
                rows,
                lifetime_total,
                period_spend,
                period_started,
                ceiling: config.budget_ceiling,
                exceeded,
            }),
            store: Some(tree),
            event_bus: None,
        })
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Tier for a severity/complexity pair, honouring the budget latch
    pub fn tier_for(&self, severity: Severity, complexity: f64) -> Tier {
        if self.ledger.lock().exceeded {
            return Tier::Local;
        }
        match severity {
            Severity::Critical | Severity::High => Tier::Cloud,
            Severity::Medium if complexity > self.medium_threshold => Tier::Cloud,
            Severity::Medium | Severity::Low => Tier::Local,
        }
    }

    pub fn select_tier(&self, signal: &Signal) -> Tier {
        let tier = self.tier_for(signal.severity, signal.estimated_complexity());
        debug!(signal_id = %signal.id, severity = %signal.severity, tier = %tier, "Selected tier");
        tier
    }

    /// Append a row and re-evaluate the budget
    pub fn record_cost(&self, record: CostRecord) -> Result<BudgetStatus, CostError> {
        if !record.cost.is_finite() || record.cost < 0.0 {
            return Err(CostError::InvalidCost(record.cost));
        }

        let (status, event) = {
            let mut ledger = self.ledger.lock();

            if let Some(tree) = &self.store {
                let key = [ROW_PREFIX, &(ledger.rows.len() as u64).to_be_bytes()].concat();
                let bytes = serde_json::to_vec(&record).map_err(|e| CostError::Storage(e.to_string()))?;
                tree.insert(key, bytes).map_err(|e| CostError::Storage(e.to_string()))?;
            }

            ledger.lifetime_total += record.cost;
            ledger.period_spend += record.cost;
            ledger.rows.push(record);

            let mut event = None;
            if !ledger.exceeded && ledger.period_spend > ledger.ceiling {
                ledger.exceeded = true;
                event = Some(exceeded_event(&ledger));
            }
            metrics::counter!("vigil_cost_records_total").increment(1);
            metrics::gauge!("vigil_ledger_total").set(ledger.lifetime_total);
            (ledger.status(), event)
        };

        if let Some(event) = event {
            self.emit(event);
        }
        Ok(status)
    }

    pub fn check_budget(&self) -> BudgetStatus {
        self.ledger.lock().status()
    }

    /// Raise (or lower) the per-period ceiling; clears the latch if spend fits
    pub fn raise_ceiling(&self, ceiling: f64) -> Result<BudgetStatus, CostError> {
        if !ceiling.is_finite() || ceiling < 0.0 {
            return Err(CostError::InvalidCeiling(ceiling));
        }
        let (status, event) = {
            let mut ledger = self.ledger.lock();
            ledger.ceiling = ceiling;
            let was_exceeded = ledger.exceeded;
            ledger.exceeded = ledger.period_spend > ceiling;
            let event = match (was_exceeded, ledger.exceeded) {
                (true, false) => Some(BudgetEvent::BudgetRestored {
                    reason: BudgetRestoreReason::CeilingRaised,
                    spent: ledger.period_spend,
                    ceiling,
                    restored_at: Utc::now(),
                }),
                (false, true) => Some(exceeded_event(&ledger)),
                _ => None,
            };
            (ledger.status(), event)
        };
        info!(ceiling, "Budget ceiling updated");
        if let Some(event) = event {
            self.emit(event);
        }
        Ok(status)
    }

    /// Start a new accounting period. The lifetime total is unaffected.
    pub fn reset_period(&self) -> Result<BudgetStatus, CostError> {
        let now = Utc::now();
        if let Some(tree) = &self.store {
            let bytes = serde_json::to_vec(&now).map_err(|e| CostError::Storage(e.to_string()))?;
            tree.insert(PERIOD_KEY, bytes).map_err(|e| CostError::Storage(e.to_string()))?;
        }
        let (status, event) = {
            let mut ledger = self.ledger.lock();
            let was_exceeded = ledger.exceeded;
            ledger.period_spend = 0.0;
            ledger.period_started = now;
            ledger.exceeded = false;
            let event = was_exceeded.then(|| BudgetEvent::BudgetRestored {
                reason: BudgetRestoreReason::PeriodReset,
                spent: 0.0,
                ceiling: ledger.ceiling,
                restored_at: now,
            });
            (ledger.status(), event)
        };
        info!("Accounting period reset");
        if let Some(event) = event {
            self.emit(event);
        }
        Ok(status)
    }

    /// Lifetime spend across all periods
    pub fn total(&self) -> f64 {
        self.ledger.lock().lifetime_total
    }

    pub fn period_spend(&self) -> f64 {
        self.ledger.lock().period_spend
    }

    pub fn ledger(&self) -> Vec<CostRecord> {
        self.ledger.lock().rows.clone()
    }

    /// True when the running total equals the sum of all rows
    pub fn reconcile(&self) -> bool {
        let ledger = self.ledger.lock();
        let sum: f64 = ledger.rows.iter().map(|r| r.cost).sum();
        (ledger.lifetime_total - sum).abs() <= f64::EPSILON * ledger.rows.len().max(1) as f64 * sum.abs().max(1.0)
    }

    pub fn export(&self) -> LedgerExport {
        let ledger = self.ledger.lock();
        LedgerExport {
            total: ledger.lifetime_total,
            period_spend: ledger.period_spend,
            period_started: ledger.period_started,
            ceiling: ledger.ceiling,
            budget: ledger.status(),
            rows: ledger.rows.clone(),
        }
    }

    pub fn export_json(&self) -> serde_json::Value {
        serde_json::to_value(self.export()).unwrap_or(serde_json::Value::Null)
    }

    /// Flat tabular export, one row per record
    pub fn export_csv(&self) -> String {
        let ledger = self.ledger.lock();
        let mut out = String::from("agent,tier,unit_count,cost,timestamp\n");
        for row in &ledger.rows {
            out.push_str(&format!(
                "{},{},{},{},{}\n",
                csv_field(&row.agent),
                row.tier,
                row.unit_count,
                row.cost,
                row.timestamp.to_rfc3339()
            ));
        }
        out
    }

    fn emit(&self, event: BudgetEvent) {
        if let BudgetEvent::BudgetExceeded { spent, ceiling, .. } = &event {
            let err = OrchestratorError::BudgetExceeded {
                spent: *spent,
                ceiling: *ceiling,
            };
            warn!(error = %err, "Tier selection forced to local");
        }
        if let Some(bus) = &self.event_bus {
            bus.publish_budget_event(event);
        }
    }
}

fn exceeded_event(ledger: &Ledger) -> BudgetEvent {
    BudgetEvent::BudgetExceeded {
        spent: ledger.period_spend,
        ceiling: ledger.ceiling,
        exceeded_at: Utc::now(),
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
