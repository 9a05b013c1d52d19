// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Template planner.
//!
//! Produces a fixed-shape remediation plan:
//!
//! ```text
//!             ┌─► remediate_1 ─┐
//! diagnose ───┼─► remediate_2 ─┼─► regression_tests ─► integrate
//!             └─► …           ─┘
//! ```
//!
//! One remediation branch per matched pattern (strongest first, capped by
//! `planner.max_remediations`), or a single generic branch when memory has
//! nothing relevant.

use async_trait::async_trait;
use vigil_cortex::Pattern;

use crate::domain::planner::{Planner, PlannerError};
use crate::domain::strategy::{StrategyIntent, TaskSpec};
use crate::domain::Signal;

pub const DEFAULT_MAX_REMEDIATIONS: usize = 3;

pub struct TemplatePlanner {
    max_remediations: usize,
}

impl TemplatePlanner {
    pub fn new(max_remediations: usize) -> Self {
        Self {
            max_remediations: max_remediations.max(1),
        }
    }
}

impl Default for TemplatePlanner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REMEDIATIONS)
    }
}

#[async_trait]
impl Planner for TemplatePlanner {
    async fn plan(&self, signal: &Signal, patterns: &[Pattern]) -> Result<StrategyIntent, PlannerError> {
        if signal.category.trim().is_empty() {
            return Err(PlannerError::NoPlan(format!("signal {} has no category", signal.id)));
        }

        let signature = signal.signature();
        let mut tasks = vec![TaskSpec::new(
            "diagnose",
            format!("Diagnose {} signal from {} ({})", signal.category, signal.source, signature),
        )];

        let mut remediations = Vec::new();
        for (i, pattern) in patterns.iter().take(self.max_remediations).enumerate() {
            let key = format!("remediate_{}", i + 1);
            tasks.push(
                TaskSpec::new(
                    key.clone(),
                    format!(
                        "Apply the remediation learned for {} (confidence {:.2}, seen {} times)",
                        pattern.signature, pattern.confidence, pattern.occurrence_count
                    ),
                )
                .after(["diagnose"]),
            );
            remediations.push(key);
        }
        if remediations.is_empty() {
            tasks.push(TaskSpec::new("remediate", format!("Remediate {}", signature)).after(["diagnose"]));
            remediations.push("remediate".to_string());
        }

        tasks.push(
            TaskSpec::new("regression_tests", "Add regression tests covering the remediated behaviour")
                .after(remediations),
        );
        tasks.push(TaskSpec::new("integrate", "Integrate the verified changes").after(["regression_tests"]));

        Ok(StrategyIntent {
            correlation_id: signal.id.0,
            signal: signal.clone(),
            tasks,
        })
    }
}
