// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository interfaces for Cortex bounded context
//! Defines the contracts for pattern storage and optional similarity search

use async_trait::async_trait;
use anyhow::Result;
use crate::domain::{Pattern, PatternId, Signature};

/// Durable storage for patterns, keyed by signature
#[async_trait]
pub trait PatternRepository: Send + Sync {
    /// Find the pattern for an exact signature
    async fn find_by_signature(&self, signature: &Signature) -> Result<Option<Pattern>>;

    /// Find a pattern by its ID
    async fn find_by_id(&self, id: PatternId) -> Result<Option<Pattern>>;

    /// Insert or replace the pattern stored under `pattern.signature`
    async fn save(&self, pattern: &Pattern) -> Result<()>;

    /// All stored patterns
    async fn list_all(&self) -> Result<Vec<Pattern>>;

    /// Number of stored patterns
    async fn count(&self) -> Result<usize> {
        Ok(self.list_all().await?.len())
    }
}

/// Optional semantic similarity backend
///
/// The pattern store holds an `Option<Arc<dyn SimilaritySearch>>`; absence
/// only degrades ranking.
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    /// Add or refresh the vector for a pattern
    async fn index(&self, pattern_id: PatternId, embedding: &[f32]) -> Result<()>;

    /// Nearest patterns with cosine similarity in `[-1, 1]`, best first
    async fn search_similar(&self, query: &[f32], limit: usize) -> Result<Vec<(PatternId, f64)>>;
}
