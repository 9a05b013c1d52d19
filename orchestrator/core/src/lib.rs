// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `vigil-core`
//!
//! Orchestration substrate for a perception → cognition → action pipeline:
//! a durable message bus between stages, a cost-aware tier router, a DAG
//! builder and executor, and an all-or-nothing verification gate.
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | strategies, tasks, costs, verification, collaborator ports |
//! | [`application`] | Application | retry wrapper, router, DAG builder, engine, gate, stages |
//! | [`infrastructure`] | Infrastructure | sled message bus, event bus, repositories, workers, verifiers |
//! | [`presentation`] | Presentation | HTTP command surface |
//! | [`runtime`] | Composition | wires a [`runtime::Pipeline`] from configuration |

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;
pub mod runtime;

pub use domain::*;
