// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Source of observed signals for the perception stage.

use async_trait::async_trait;

use crate::domain::Signal;

#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Next observed signal; `None` once the source is exhausted
    async fn next_signal(&self) -> Option<Signal>;
}
