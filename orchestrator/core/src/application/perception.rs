// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Perception stage: telemetry in, `signals` topic out.
//!
//! Each signal is published with `correlation_id = signal.id`, which every
//! downstream stage uses to stay idempotent under redelivery.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::application::retry::RetryPolicy;
use crate::domain::errors::OrchestratorError;
use crate::domain::message::{topics, MessageId};
use crate::domain::telemetry::TelemetrySource;
use crate::domain::Signal;
use crate::infrastructure::message_bus::MessageBus;

pub struct PerceptionStage {
    source: Arc<dyn TelemetrySource>,
    bus: MessageBus,
    retry: RetryPolicy,
}

impl PerceptionStage {
    pub fn new(source: Arc<dyn TelemetrySource>, bus: MessageBus, retry: RetryPolicy) -> Self {
        Self { source, bus, retry }
    }

    pub async fn publish(&self, signal: &Signal) -> Result<MessageId, OrchestratorError> {
        let id = self
            .retry
            .run("publish:signals", || self.bus.publish(topics::SIGNALS, signal, signal.id.0))
            .await
            .map_err(|e| OrchestratorError::Fatal(e.to_string()))?;
        metrics::counter!("vigil_signals_perceived_total", "severity" => signal.severity.as_str()).increment(1);
        debug!(signal_id = %signal.id, category = %signal.category, severity = %signal.severity, "Signal published");
        Ok(id)
    }

    /// Drain the telemetry source until it ends or `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) -> Result<usize, OrchestratorError> {
        info!("Perception stage started");
        let mut published = 0;
        loop {
            let signal = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.source.next_signal() => match next {
                    Some(signal) => signal,
                    None => {
                        info!("Telemetry source exhausted");
                        break;
                    }
                },
            };
            if let Err(err) = self.publish(&signal).await {
                error!(signal_id = %signal.id, error = %err, "Signal could not be made durable");
                return Err(err);
            }
            published += 1;
        }
        info!(published, "Perception stage stopped");
        Ok(published)
    }
}
