// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Bus message envelope.
//!
//! Consumers never mutate a [`Message`]; they decode the payload and
//! acknowledge the id once their side effect is durable.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known topics connecting the pipeline stages
pub mod topics {
    pub const SIGNALS: &str = "signals";
    pub const STRATEGIES: &str = "strategies";
    pub const OUTCOMES: &str = "outcomes";
    pub const ADVISORIES: &str = "advisories";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Envelope as persisted and delivered.
///
/// The wire form is `{id, topic, offset, payload, correlation_id, timestamp,
/// delivery_attempt}`; timestamps serialize as RFC 3339.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub topic: String,
    /// Position within the topic, assigned at publish time
    pub offset: u64,
    pub payload: serde_json::Value,
    pub correlation_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// 1 on first delivery, incremented on every redelivery
    pub delivery_attempt: u32,
}

impl Message {
    pub fn new(topic: impl Into<String>, offset: u64, payload: serde_json::Value, correlation_id: Uuid) -> Self {
        Self {
            id: MessageId::new(),
            topic: topic.into(),
            offset,
            payload,
            correlation_id,
            timestamp: Utc::now(),
            delivery_attempt: 1,
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    pub fn is_redelivery(&self) -> bool {
        self.delivery_attempt > 1
    }
}
