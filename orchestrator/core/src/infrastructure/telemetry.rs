// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-process telemetry source fed through a bounded channel.
//!
//! External collectors (the HTTP signal endpoint, log tailers, test
//! harnesses) hold a [`TelemetrySender`]; the perception stage drains the
//! paired [`ChannelTelemetrySource`].

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::domain::telemetry::TelemetrySource;
use crate::domain::Signal;

pub const DEFAULT_TELEMETRY_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct TelemetrySender {
    tx: mpsc::Sender<Signal>,
}

impl TelemetrySender {
    /// Waits for capacity; fails only when the source has been dropped
    pub async fn send(&self, signal: Signal) -> Result<(), Signal> {
        self.tx.send(signal).await.map_err(|e| e.0)
    }
}

pub struct ChannelTelemetrySource {
    rx: Mutex<mpsc::Receiver<Signal>>,
}

impl ChannelTelemetrySource {
    pub fn channel(capacity: usize) -> (TelemetrySender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (TelemetrySender { tx }, Self { rx: Mutex::new(rx) })
    }
}

#[async_trait]
impl TelemetrySource for ChannelTelemetrySource {
    async fn next_signal(&self) -> Option<Signal> {
        self.rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;
    use serde_json::json;

    #[tokio::test]
    async fn test_source_ends_when_senders_drop() {
        let (tx, source) = ChannelTelemetrySource::channel(4);
        let signal = Signal::new("kubelet", "memory", Severity::Low, json!({}));
        tx.send(signal.clone()).await.unwrap();
        drop(tx);

        assert_eq!(source.next_signal().await.unwrap().id, signal.id);
        assert!(source.next_signal().await.is_none());
    }
}
