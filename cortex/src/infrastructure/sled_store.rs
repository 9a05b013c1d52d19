// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Sled Pattern Store
//!
//! Persists patterns in an embedded sled tree so learned memory survives
//! restarts. Records are stored as JSON in the persisted pattern form and
//! keyed by signature, which makes merge-on-match a single point lookup.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::domain::{Pattern, PatternId, Signature};
use super::repository::PatternRepository;

const PATTERN_TREE: &str = "cortex.patterns";

#[derive(Clone)]
pub struct SledPatternRepository {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledPatternRepository {
    /// Open (or create) a standalone database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .with_context(|| format!("Failed to open pattern store at {}", path.display()))?;
        Self::from_db(&db)
    }

    /// Share an already-open database with other components
    pub fn from_db(db: &sled::Db) -> Result<Self> {
        let tree = db
            .open_tree(PATTERN_TREE)
            .context("Failed to open pattern tree")?;
        Ok(Self { db: db.clone(), tree })
    }

    fn decode(bytes: &[u8]) -> Result<Pattern> {
        serde_json::from_slice(bytes).context("Corrupt pattern record")
    }
}

#[async_trait]
impl PatternRepository for SledPatternRepository {
    async fn find_by_signature(&self, signature: &Signature) -> Result<Option<Pattern>> {
        match self.tree.get(signature.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, id: PatternId) -> Result<Option<Pattern>> {
        for entry in self.tree.iter() {
            let (_, bytes) = entry?;
            let pattern = Self::decode(&bytes)?;
            if pattern.id == id {
                return Ok(Some(pattern));
            }
        }
        Ok(None)
    }

    async fn save(&self, pattern: &Pattern) -> Result<()> {
        let bytes = serde_json::to_vec(pattern)?;
        self.tree.insert(pattern.signature.as_str().as_bytes(), bytes)?;
        self.db.flush_async().await.context("Failed to flush pattern store")?;
        debug!(pattern_id = %pattern.id, signature = %pattern.signature, "Persisted pattern");
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Pattern>> {
        self.tree
            .iter()
            .map(|entry| {
                let (_, bytes) = entry?;
                Self::decode(&bytes)
            })
            .collect()
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.tree.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Evidence;

    #[tokio::test]
    async fn test_patterns_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let signature = Signature::new("disk:full,volume");

        {
            let repo = SledPatternRepository::open(dir.path()).unwrap();
            let pattern = Pattern::from_evidence(signature.clone(), &Evidence::new(0.6));
            repo.save(&pattern).await.unwrap();
        }

        let reopened = SledPatternRepository::open(dir.path()).unwrap();
        let found = reopened.find_by_signature(&signature).await.unwrap().unwrap();
        assert_eq!(found.confidence, 0.6);
        assert_eq!(reopened.count().await.unwrap(), 1);
        assert_eq!(reopened.find_by_id(found.id).await.unwrap().unwrap().signature, signature);
    }

    #[tokio::test]
    async fn test_save_replaces_record_for_same_signature() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SledPatternRepository::open(dir.path()).unwrap();
        let mut pattern = Pattern::from_evidence(Signature::new("net:timeout"), &Evidence::new(0.2));
        repo.save(&pattern).await.unwrap();
        pattern.reinforce(&Evidence::new(1.0), 0.5);
        repo.save(&pattern).await.unwrap();

        let all = repo.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].occurrence_count, 2);
    }
}
