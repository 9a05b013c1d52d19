// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use super::signal::{Signature, SignalId};

/// Default EMA weight given to the newest piece of evidence.
pub const DEFAULT_SMOOTHING: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternId(pub Uuid);

impl PatternId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PatternId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PatternId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One observation supporting (or weakening) a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Evidence strength in `[0, 1]`.
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_id: Option<SignalId>,
    pub observed_at: DateTime<Utc>,
}

impl Evidence {
    /// Scores outside `[0, 1]` are clamped; NaN becomes 0.
    pub fn new(score: f64) -> Self {
        Self {
            score: clamp_score(score),
            embedding: None,
            signal_id: None,
            observed_at: Utc::now(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn from_signal(mut self, signal_id: SignalId) -> Self {
        self.signal_id = Some(signal_id);
        self
    }
}

/// A learned, confidence-scored generalization over one or more signals.
///
/// Serialized exactly as the persisted pattern record:
/// `{id, signature, embedding?, confidence, occurrence_count, last_seen}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    pub signature: Signature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub confidence: f64,
    pub occurrence_count: u64,
    pub last_seen: DateTime<Utc>,
}

impl Pattern {
    /// First detection: confidence is seeded from the evidence itself.
    pub fn from_evidence(signature: Signature, evidence: &Evidence) -> Self {
        Self {
            id: PatternId::new(),
            signature,
            embedding: evidence.embedding.clone(),
            confidence: clamp_score(evidence.score),
            occurrence_count: 1,
            last_seen: evidence.observed_at,
        }
    }

    /// Merge a repeat detection into this pattern.
    ///
    /// Confidence follows an exponential moving average where `smoothing`
    /// is the weight of the new evidence.
    pub fn reinforce(&mut self, evidence: &Evidence, smoothing: f64) {
        let alpha = smoothing.clamp(0.0, 1.0);
        self.confidence = clamp_score(alpha * clamp_score(evidence.score) + (1.0 - alpha) * self.confidence);
        self.occurrence_count = self.occurrence_count.saturating_add(1);
        if evidence.observed_at > self.last_seen {
            self.last_seen = evidence.observed_at;
        }
        if let Some(embedding) = &evidence.embedding {
            self.embedding = Some(embedding.clone());
        }
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_pattern_seeds_confidence_from_evidence() {
        let pattern = Pattern::from_evidence(Signature::new("disk:full"), &Evidence::new(0.8));
        assert_eq!(pattern.confidence, 0.8);
        assert_eq!(pattern.occurrence_count, 1);
        assert!(pattern.embedding.is_none());
    }

    #[test]
    fn test_reinforce_applies_ema() {
        let mut pattern = Pattern::from_evidence(Signature::new("disk:full"), &Evidence::new(1.0));
        pattern.reinforce(&Evidence::new(0.0), 0.5);
        assert_eq!(pattern.confidence, 0.5);
        pattern.reinforce(&Evidence::new(1.0), 0.5);
        assert_eq!(pattern.confidence, 0.75);
        assert_eq!(pattern.occurrence_count, 3);
    }

    #[test]
    fn test_evidence_score_is_clamped() {
        assert_eq!(Evidence::new(4.2).score, 1.0);
        assert_eq!(Evidence::new(-1.0).score, 0.0);
        assert_eq!(Evidence::new(f64::NAN).score, 0.0);
    }

    #[test]
    fn test_deserialized_evidence_cannot_push_confidence_out_of_range() {
        let evidence: Evidence = serde_json::from_value(serde_json::json!({
            "score": 7.5,
            "observed_at": Utc::now(),
        }))
        .unwrap();
        assert_eq!(evidence.score, 7.5);

        let mut pattern = Pattern::from_evidence(Signature::new("disk:full"), &evidence);
        assert_eq!(pattern.confidence, 1.0);

        let negative = Evidence { score: -3.0, ..evidence };
        pattern.reinforce(&negative, 1.0);
        assert_eq!(pattern.confidence, 0.0);
    }

    #[test]
    fn test_persisted_form_fields() {
        let pattern = Pattern::from_evidence(Signature::new("#E0308"), &Evidence::new(0.4));
        let value = serde_json::to_value(&pattern).unwrap();
        assert_eq!(value["signature"], "#E0308");
        assert_eq!(value["occurrence_count"], 1);
        assert!(value.get("embedding").is_none());
        assert!(value.get("last_seen").is_some());
    }
}
