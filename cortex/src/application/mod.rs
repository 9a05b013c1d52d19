// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod cortex_service;

pub use cortex_service::{CortexService, EventBus, NullEventBus, StandardCortexService};
