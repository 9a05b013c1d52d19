// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Cortex domain layer: signals, signatures, patterns and learning events.

pub mod signal;
pub mod pattern;
pub mod events;

pub use signal::*;
pub use pattern::*;
pub use events::*;
