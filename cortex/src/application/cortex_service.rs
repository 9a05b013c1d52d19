// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # CortexService: Pattern Recording & Retrieval
//!
//! Application service behind the learning loop: every strategy outcome is
//! recorded against the originating signal's [`Signature`], and cognition
//! queries the store before planning so recurring conditions are recognised.
//!
//! ## Merge-on-match
//!
//! Recording a signature that already exists reinforces the stored pattern
//! (occurrence count and an exponential moving average over confidence)
//! instead of adding a row. Read-modify-write cycles are serialized per
//! signature, so concurrent detections of one signature never lose updates
//! while unrelated signatures proceed in parallel.
//!
//! ## Two-tier matching
//!
//! - **Keyword tier** (always on): exact signature match, else keyword overlap
//!   between the signal and the stored signature.
//! - **Semantic tier** (optional): when both an [`Embedder`] and a
//!   [`SimilaritySearch`] backend are configured, nearest neighbours above
//!   `min_similarity` join the candidate set. Failures in this tier are logged
//!   and the keyword result is returned unchanged.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::domain::{CortexEvent, Evidence, Pattern, PatternId, Signal, Signature, DEFAULT_SMOOTHING};
use crate::infrastructure::{Embedder, PatternRepository, SimilaritySearch};

/// Event bus trait for publishing domain events
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: CortexEvent) -> Result<()>;
}

/// Discards events; used when nothing subscribes to cortex activity
pub struct NullEventBus;

#[async_trait]
impl EventBus for NullEventBus {
    async fn publish(&self, _event: CortexEvent) -> Result<()> {
        Ok(())
    }
}

/// CortexService interface
#[async_trait]
pub trait CortexService: Send + Sync {
    /// Merge evidence into the pattern for `signature`, creating it on first sight
    async fn record(&self, signature: Signature, evidence: Evidence) -> Result<Pattern>;

    /// Patterns relevant to `signal`, by descending confidence.
    /// An empty store yields an empty vector.
    async fn query(&self, signal: &Signal, limit: usize) -> Result<Vec<Pattern>>;

    async fn get(&self, pattern_id: PatternId) -> Result<Option<Pattern>>;

    async fn list(&self) -> Result<Vec<Pattern>>;
}

/// Standard implementation of CortexService
pub struct StandardCortexService {
    pattern_repo: Arc<dyn PatternRepository>,
    similarity: Option<Arc<dyn SimilaritySearch>>,
    embedder: Option<Arc<dyn Embedder>>,
    event_bus: Arc<dyn EventBus>,
    smoothing: f64,
    min_similarity: f64,
    signature_locks: DashMap<Signature, Arc<tokio::sync::Mutex<()>>>,
}

impl StandardCortexService {
    pub const DEFAULT_MIN_SIMILARITY: f64 = 0.75;

    pub fn new(pattern_repo: Arc<dyn PatternRepository>, event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            pattern_repo,
            similarity: None,
            embedder: None,
            event_bus,
            smoothing: DEFAULT_SMOOTHING,
            min_similarity: Self::DEFAULT_MIN_SIMILARITY,
            signature_locks: DashMap::new(),
        }
    }

    /// Enable the semantic tier
    pub fn with_semantic_search(
        mut self,
        embedder: Arc<dyn Embedder>,
        similarity: Arc<dyn SimilaritySearch>,
    ) -> Self {
        self.embedder = Some(embedder);
        self.similarity = Some(similarity);
        self
    }

    pub fn with_smoothing(mut self, smoothing: f64) -> Self {
        self.smoothing = smoothing.clamp(0.0, 1.0);
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f64) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn semantic_enabled(&self) -> bool {
        self.embedder.is_some() && self.similarity.is_some()
    }

    /// Re-index every persisted embedding into the similarity backend
    pub async fn rebuild_index(&self) -> Result<usize> {
        let Some(similarity) = &self.similarity else {
            return Ok(0);
        };
        let mut indexed = 0;
        for pattern in self.pattern_repo.list_all().await? {
            if let Some(embedding) = &pattern.embedding {
                similarity.index(pattern.id, embedding).await?;
                indexed += 1;
            }
        }
        info!(indexed, "Rebuilt pattern similarity index");
        Ok(indexed)
    }

    fn lock_for(&self, signature: &Signature) -> Arc<tokio::sync::Mutex<()>> {
        self.signature_locks
            .entry(signature.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn semantic_candidates(&self, signal: &Signal, limit: usize) -> Result<Vec<(PatternId, f64)>> {
        let (Some(embedder), Some(similarity)) = (&self.embedder, &self.similarity) else {
            return Ok(Vec::new());
        };
        let query = embedder.embed(&signal.describe()).await?;
        let hits = similarity.search_similar(&query, limit.saturating_mul(4).max(limit)).await?;
        Ok(hits
            .into_iter()
            .filter(|(_, score)| *score >= self.min_similarity)
            .collect())
    }
}

#[async_trait]
impl CortexService for StandardCortexService {
    async fn record(&self, signature: Signature, mut evidence: Evidence) -> Result<Pattern> {
        let lock = self.lock_for(&signature);
        let _guard = lock.lock().await;

        if evidence.embedding.is_none() {
            if let Some(embedder) = &self.embedder {
                match embedder.embed(signature.as_str()).await {
                    Ok(embedding) => evidence.embedding = Some(embedding),
                    Err(e) => warn!(signature = %signature, error = %e, "Embedding failed, recording without one"),
                }
            }
        }

        let (pattern, event) = match self.pattern_repo.find_by_signature(&signature).await? {
            Some(mut existing) => {
                let old_confidence = existing.confidence;
                existing.reinforce(&evidence, self.smoothing);
                let event = CortexEvent::PatternReinforced {
                    pattern_id: existing.id,
                    signature: signature.to_string(),
                    old_confidence,
                    new_confidence: existing.confidence,
                    occurrence_count: existing.occurrence_count,
                    timestamp: Utc::now(),
                };
                (existing, event)
            }
            None => {
                let pattern = Pattern::from_evidence(signature.clone(), &evidence);
                let event = CortexEvent::PatternDiscovered {
                    pattern_id: pattern.id,
                    signature: signature.to_string(),
                    confidence: pattern.confidence,
                    timestamp: Utc::now(),
                };
                (pattern, event)
            }
        };

        self.pattern_repo.save(&pattern).await?;

        if let (Some(similarity), Some(embedding)) = (&self.similarity, &pattern.embedding) {
            if let Err(e) = similarity.index(pattern.id, embedding).await {
                warn!(pattern_id = %pattern.id, error = %e, "Failed to index pattern embedding");
            }
        }

        debug!(
            pattern_id = %pattern.id,
            signature = %pattern.signature,
            confidence = pattern.confidence,
            occurrences = pattern.occurrence_count,
            "Recorded pattern evidence"
        );

        if let Err(e) = self.event_bus.publish(event).await {
            warn!(pattern_id = %pattern.id, error = %e, "Failed to publish cortex event");
        }

        Ok(pattern)
    }

    async fn query(&self, signal: &Signal, limit: usize) -> Result<Vec<Pattern>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let signature = signal.signature();
        let keywords = signal.keywords();
        let all = self.pattern_repo.list_all().await?;
        if all.is_empty() {
            return Ok(Vec::new());
        }

        // Candidate set keyed by pattern id with the strongest match seen
        let mut strengths: HashMap<PatternId, f64> = HashMap::new();
        for pattern in &all {
            let strength = if pattern.signature == signature {
                1.0
            } else if pattern.signature.is_structural() {
                0.0
            } else {
                pattern.signature.overlap(&keywords)
            };
            if strength > 0.0 {
                strengths.insert(pattern.id, strength);
            }
        }

        match self.semantic_candidates(signal, limit).await {
            Ok(hits) => {
                for (pattern_id, score) in hits {
                    let entry = strengths.entry(pattern_id).or_insert(0.0);
                    *entry = entry.max(score);
                }
            }
            Err(e) => warn!(signal_id = %signal.id, error = %e, "Semantic pattern search failed, using keyword matches only"),
        }

        let mut ranked: Vec<(Pattern, f64)> = all
            .into_iter()
            .filter_map(|p| strengths.get(&p.id).copied().map(|s| (p, s)))
            .collect();

        ranked.sort_by(|a, b| {
            b.0.confidence
                .partial_cmp(&a.0.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal))
                .then_with(|| b.0.occurrence_count.cmp(&a.0.occurrence_count))
        });

        Ok(ranked.into_iter().take(limit).map(|(p, _)| p).collect())
    }

    async fn get(&self, pattern_id: PatternId) -> Result<Option<Pattern>> {
        self.pattern_repo.find_by_id(pattern_id).await
    }

    async fn list(&self) -> Result<Vec<Pattern>> {
        self.pattern_repo.list_all().await
    }
}
