// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Infrastructure layer for Cortex bounded context

pub mod repository;
pub mod memory_store;
pub mod sled_store;
pub mod embedding_client;
pub mod vector_index;

pub use repository::{PatternRepository, SimilaritySearch};
pub use memory_store::InMemoryPatternRepository;
pub use sled_store::SledPatternRepository;
pub use embedding_client::{Embedder, HashEmbedder};
pub use vector_index::{cosine_similarity, InMemoryVectorIndex};
