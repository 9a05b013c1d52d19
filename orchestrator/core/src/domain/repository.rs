// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contract for the `Strategy` aggregate, defined in the domain
//! layer and implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `StrategyRepository` | `Strategy` | `InMemoryStrategyRepository`, `SledStrategyRepository` |
//!
//! The backend is selected at startup from `spec.storage` in the node
//! configuration. Pattern persistence lives in `vigil-cortex`.

use async_trait::async_trait;

use crate::domain::strategy::{Strategy, StrategyId};

/// Repository interface for Strategy aggregates
#[async_trait]
pub trait StrategyRepository: Send + Sync {
    /// Save strategy (create or update)
    async fn save(&self, strategy: &Strategy) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: StrategyId) -> Result<Option<Strategy>, RepositoryError>;

    /// Most recently updated first
    async fn list_recent(&self, limit: usize) -> Result<Vec<Strategy>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sled::Error> for RepositoryError {
    fn from(err: sled::Error) -> Self {
        RepositoryError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
