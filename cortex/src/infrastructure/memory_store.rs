// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HashMap-backed pattern repository for tests and ephemeral runs

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::{Pattern, PatternId, Signature};
use super::repository::PatternRepository;

#[derive(Clone, Default)]
pub struct InMemoryPatternRepository {
    patterns: Arc<RwLock<HashMap<Signature, Pattern>>>,
}

impl InMemoryPatternRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PatternRepository for InMemoryPatternRepository {
    async fn find_by_signature(&self, signature: &Signature) -> Result<Option<Pattern>> {
        Ok(self.patterns.read().get(signature).cloned())
    }

    async fn find_by_id(&self, id: PatternId) -> Result<Option<Pattern>> {
        Ok(self.patterns.read().values().find(|p| p.id == id).cloned())
    }

    async fn save(&self, pattern: &Pattern) -> Result<()> {
        self.patterns
            .write()
            .insert(pattern.signature.clone(), pattern.clone());
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Pattern>> {
        Ok(self.patterns.read().values().cloned().collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.patterns.read().len())
    }
}
