// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Infrastructure Layer (`vigil-core`)
//!
//! Adapters behind the domain ports.
//!
//! | Module | Port / Concern |
//! |--------|----------------|
//! | [`message_bus`] | durable topics between pipeline stages (sled) |
//! | [`event_bus`] | in-process broadcast of domain events |
//! | [`repositories`] | `StrategyRepository` (in-memory, sled) |
//! | [`llm`] | `LLMProvider` adapters (Ollama, OpenAI) |
//! | [`workers`] | `Worker` implementations |
//! | [`verifiers`] | `Verifier` implementations |
//! | [`telemetry`] | `TelemetrySource` implementations |

pub mod event_bus;
pub mod llm;
pub mod message_bus;
pub mod repositories;
pub mod telemetry;
pub mod verifiers;
pub mod workers;

pub use event_bus::{DomainEvent, EventBus};
pub use message_bus::{BusError, MessageBus, Subscription};
