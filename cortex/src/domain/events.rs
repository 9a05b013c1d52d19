// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Domain events for the Cortex bounded context
//! Published whenever the learning step changes pattern memory

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::pattern::PatternId;

/// Cortex domain events
/// These events are published to the EventBus for observability and integration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CortexEvent {
    /// A signature was seen for the first time
    PatternDiscovered {
        pattern_id: PatternId,
        signature: String,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },

    /// A repeat detection was merged into an existing pattern
    PatternReinforced {
        pattern_id: PatternId,
        signature: String,
        old_confidence: f64,
        new_confidence: f64,
        occurrence_count: u64,
        timestamp: DateTime<Utc>,
    },
}

impl CortexEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CortexEvent::PatternDiscovered { timestamp, .. } => *timestamp,
            CortexEvent::PatternReinforced { timestamp, .. } => *timestamp,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            CortexEvent::PatternDiscovered { .. } => "pattern_discovered",
            CortexEvent::PatternReinforced { .. } => "pattern_reinforced",
        }
    }

    pub fn pattern_id(&self) -> PatternId {
        match self {
            CortexEvent::PatternDiscovered { pattern_id, .. } => *pattern_id,
            CortexEvent::PatternReinforced { pattern_id, .. } => *pattern_id,
        }
    }
}
