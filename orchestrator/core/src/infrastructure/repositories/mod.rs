// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository abstractions defined in
//! the domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve `Strategy` aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **SledStrategyRepository** - embedded, survives restarts
//! - **InMemoryStrategyRepository** - thread-safe HashMap for tests and
//!   `storage.backend: memory`

pub mod sled_strategy;

pub use sled_strategy::SledStrategyRepository;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::domain::repository::{RepositoryError, StrategyRepository};
use crate::domain::strategy::{Strategy, StrategyId};

#[derive(Clone, Default)]
pub struct InMemoryStrategyRepository {
    strategies: Arc<RwLock<HashMap<StrategyId, Strategy>>>,
}

impl InMemoryStrategyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StrategyRepository for InMemoryStrategyRepository {
    async fn save(&self, strategy: &Strategy) -> Result<(), RepositoryError> {
        let mut strategies = self
            .strategies
            .write()
            .map_err(|_| RepositoryError::Storage("strategy lock poisoned".into()))?;
        strategies.insert(strategy.id, strategy.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: StrategyId) -> Result<Option<Strategy>, RepositoryError> {
        let strategies = self
            .strategies
            .read()
            .map_err(|_| RepositoryError::Storage("strategy lock poisoned".into()))?;
        Ok(strategies.get(&id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Strategy>, RepositoryError> {
        let strategies = self
            .strategies
            .read()
            .map_err(|_| RepositoryError::Storage("strategy lock poisoned".into()))?;
        let mut all: Vec<Strategy> = strategies.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all.truncate(limit);
        Ok(all)
    }
}
