// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Brute-force cosine similarity index held in memory
//!
//! Filled from the pattern repository at startup by
//! `StandardCortexService::rebuild_index`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::PatternId;
use super::repository::SimilaritySearch;

#[derive(Clone, Default)]
pub struct InMemoryVectorIndex {
    vectors: Arc<RwLock<HashMap<PatternId, Vec<f32>>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SimilaritySearch for InMemoryVectorIndex {
    async fn index(&self, pattern_id: PatternId, embedding: &[f32]) -> Result<()> {
        if embedding.is_empty() {
            bail!("Refusing to index an empty embedding for pattern {}", pattern_id);
        }
        self.vectors.write().insert(pattern_id, embedding.to_vec());
        Ok(())
    }

    async fn search_similar(&self, query: &[f32], limit: usize) -> Result<Vec<(PatternId, f64)>> {
        let vectors = self.vectors.read();
        let mut scored: Vec<(PatternId, f64)> = vectors
            .iter()
            .filter(|(_, v)| v.len() == query.len())
            .map(|(id, v)| (*id, cosine_similarity(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

/// Cosine similarity; zero when either vector has no magnitude or lengths differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
