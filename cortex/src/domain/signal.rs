// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Signals and Signatures
//!
//! A [`Signal`] is one observed telemetry item emitted by the perception stage.
//! It is immutable once published. Cognition derives a [`Signature`] from it,
//! which is the key the pattern store merges on.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of keywords folded into a keyword signature.
const SIGNATURE_KEYWORDS: usize = 8;

/// Payload fields are walked at most this deep when collecting keywords.
const MAX_PAYLOAD_DEPTH: usize = 4;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "this", "that", "was", "were", "are", "has", "have",
    "had", "not", "but", "into", "onto", "over", "under", "after", "before", "when", "then",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalId(pub Uuid);

impl SignalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SignalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Severity of an observed signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// An observed event that may indicate a recurring condition worth acting on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub source: String,
    pub category: String,
    pub severity: Severity,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn new(
        source: impl Into<String>,
        category: impl Into<String>,
        severity: Severity,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: SignalId::new(),
            source: source.into(),
            category: category.into(),
            severity,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Lower-cased keywords drawn from the category and every string in the payload.
    pub fn keywords(&self) -> BTreeSet<String> {
        self.keyword_frequencies().into_keys().collect()
    }

    /// Derive the signature cognition merges patterns on.
    ///
    /// A `fingerprint` string in the payload is taken as a structural
    /// signature; otherwise the most frequent keywords are used.
    pub fn signature(&self) -> Signature {
        if let Some(fingerprint) = self.payload.get("fingerprint").and_then(|v| v.as_str()) {
            if !fingerprint.trim().is_empty() {
                return Signature::structural(fingerprint);
            }
        }

        let mut ranked: Vec<(String, usize)> = self.keyword_frequencies().into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Signature::keyword(
            &self.category,
            ranked.into_iter().take(SIGNATURE_KEYWORDS).map(|(word, _)| word),
        )
    }

    /// Estimated task complexity in `[0, 1]`.
    ///
    /// Uses an explicit numeric `complexity` payload field when present,
    /// otherwise scales with the number of distinct keywords.
    pub fn estimated_complexity(&self) -> f64 {
        if let Some(explicit) = self.payload.get("complexity").and_then(|v| v.as_f64()) {
            if explicit.is_finite() {
                return explicit.clamp(0.0, 1.0);
            }
        }
        (self.keywords().len() as f64 / 20.0).clamp(0.0, 1.0)
    }

    /// Free-text rendering used to compute embeddings.
    pub fn describe(&self) -> String {
        let keywords: Vec<String> = self.keywords().into_iter().collect();
        format!("{} {} {}", self.category, self.source, keywords.join(" "))
    }

    fn keyword_frequencies(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for word in tokenize(&self.category) {
            *counts.entry(word).or_insert(0) += 1;
        }
        collect_payload_words(&self.payload, 0, &mut counts);
        counts
    }
}

fn collect_payload_words(value: &serde_json::Value, depth: usize, counts: &mut HashMap<String, usize>) {
    if depth > MAX_PAYLOAD_DEPTH {
        return;
    }
    match value {
        serde_json::Value::String(text) => {
            for word in tokenize(text) {
                *counts.entry(word).or_insert(0) += 1;
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_payload_words(item, depth + 1, counts);
            }
        }
        serde_json::Value::Object(map) => {
            for (key, item) in map {
                // Numeric hints are not keywords
                if key == "complexity" || key == "fingerprint" {
                    continue;
                }
                collect_payload_words(item, depth + 1, counts);
            }
        }
        _ => {}
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .map(|word| word.to_lowercase())
        .filter(|word| word.len() >= 3)
        .filter(|word| !word.chars().all(|c| c.is_ascii_digit()))
        .filter(|word| !STOPWORDS.contains(&word.as_str()))
}

/// Keyword or structural fingerprint that identifies a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    /// `"<category>:<kw1>,<kw2>,…"` with keywords sorted and deduplicated.
    pub fn keyword<I, S>(category: &str, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words: BTreeSet<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        let words: Vec<String> = words.into_iter().collect();
        Self(format!("{}:{}", category.trim().to_lowercase(), words.join(",")))
    }

    pub fn structural(fingerprint: &str) -> Self {
        Self(format!("#{}", fingerprint.trim()))
    }

    pub fn is_structural(&self) -> bool {
        self.0.starts_with('#')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Terms used for keyword-overlap matching.
    pub fn terms(&self) -> BTreeSet<String> {
        self.0
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| t.len() >= 2)
            .map(|t| t.to_lowercase())
            .collect()
    }

    /// Jaccard overlap between this signature's terms and `keywords`.
    pub fn overlap(&self, keywords: &BTreeSet<String>) -> f64 {
        let terms = self.terms();
        if terms.is_empty() || keywords.is_empty() {
            return 0.0;
        }
        let shared = terms.intersection(keywords).count();
        let union = terms.union(keywords).count();
        shared as f64 / union as f64
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
