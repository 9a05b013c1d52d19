// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Sled-backed strategy store. Records are JSON keyed by strategy id bytes.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::repository::{RepositoryError, StrategyRepository};
use crate::domain::strategy::{Strategy, StrategyId};

const STRATEGY_TREE: &str = "strategies";

#[derive(Clone)]
pub struct SledStrategyRepository {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledStrategyRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let db = sled::open(path.as_ref())?;
        Self::from_db(&db)
    }

    pub fn from_db(db: &sled::Db) -> Result<Self, RepositoryError> {
        let tree = db.open_tree(STRATEGY_TREE)?;
        Ok(Self { db: db.clone(), tree })
    }
}

#[async_trait]
impl StrategyRepository for SledStrategyRepository {
    async fn save(&self, strategy: &Strategy) -> Result<(), RepositoryError> {
        let bytes = serde_json::to_vec(strategy)?;
        self.tree.insert(strategy.id.0.as_bytes(), bytes)?;
        self.db.flush_async().await?;
        debug!(strategy_id = %strategy.id, status = ?strategy.status, "Persisted strategy");
        Ok(())
    }

    async fn find_by_id(&self, id: StrategyId) -> Result<Option<Strategy>, RepositoryError> {
        match self.tree.get(id.0.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Strategy>, RepositoryError> {
        let mut all = self
            .tree
            .iter()
            .map(|entry| {
                let (_, bytes) = entry?;
                Ok(serde_json::from_slice::<Strategy>(&bytes)?)
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all.truncate(limit);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::StrategyStatus;
    use crate::domain::{Severity, Signal};
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_strategy_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let signal = Signal::new("kubelet", "memory", Severity::High, json!({"pod": "api"}));
        let mut strategy = Strategy::new(Uuid::new_v4(), signal, Vec::new());
        strategy.mark_executing();

        {
            let repo = SledStrategyRepository::open(dir.path()).unwrap();
            repo.save(&strategy).await.unwrap();
        }

        let repo = SledStrategyRepository::open(dir.path()).unwrap();
        let found = repo.find_by_id(strategy.id).await.unwrap().unwrap();
        assert_eq!(found.status, StrategyStatus::Executing);
        assert_eq!(found.signal.category, "memory");
        assert_eq!(repo.list_recent(10).await.unwrap().len(), 1);
    }
}
