// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `vigil-cortex`: Cross-Session Pattern Memory
//!
//! Remembers which signal patterns have been seen, how often, and how much
//! confidence the pipeline has in them, across process restarts.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `Signal`, `Signature`, `Pattern`, `Evidence`, `CortexEvent` |
//! | [`application`] | Application | `CortexService` (record / query) |
//! | [`infrastructure`] | Infrastructure | in-memory and sled repositories, embedder, vector index |
//!
//! Keyword matching is always available. Semantic similarity is an optional
//! capability: when no [`infrastructure::SimilaritySearch`] backend is
//! configured, ranking quality degrades but queries keep working.

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
pub use application::{CortexService, EventBus, NullEventBus, StandardCortexService};
