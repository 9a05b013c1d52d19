// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Durable Message Bus
//!
//! Persistent publish/subscribe channel connecting the pipeline stages,
//! backed by an embedded sled database so nothing is lost across restarts.
//!
//! ## Layout
//!
//! | Tree | Key | Value |
//! |------|-----|-------|
//! | `bus.topic.<topic>` | big-endian offset | JSON [`Message`] envelope |
//! | `bus.sub.<topic>.<subscriber>.state` | `cursor` | lowest unacknowledged offset |
//! | `bus.sub.<topic>.<subscriber>.acks` | offset | acknowledged above the cursor |
//! | `bus.sub.<topic>.<subscriber>.attempts` | offset | delivery count so far |
//!
//! ## Guarantees
//!
//! - `publish` returns only after the envelope is flushed to disk.
//! - At-least-once per subscriber: a delivery not acknowledged within the
//!   visibility timeout is delivered again, and after a restart every
//!   unacknowledged message is delivered again, with `delivery_attempt`
//!   incremented and the original `correlation_id`.
//! - First deliveries follow offset order within a topic. There is no
//!   ordering across topics and no deduplication: consumers must be
//!   idempotent on `correlation_id`.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{OrchestratorError, Retryable};
use crate::domain::message::{Message, MessageId};
use crate::domain::node_config::BusConfig;

const CURSOR_KEY: &[u8] = b"cursor";

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Bus serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown or already acknowledged message {0}")]
    UnknownMessage(MessageId),

    #[error("Message bus is closed")]
    Closed,
}

impl Retryable for BusError {
    fn is_transient(&self) -> bool {
        matches!(self, BusError::Storage(_))
    }
}

impl From<BusError> for OrchestratorError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Storage(_) | BusError::Closed => OrchestratorError::Transient(err.to_string()),
            BusError::Serialization(_) | BusError::UnknownMessage(_) => OrchestratorError::Validation(err.to_string()),
        }
    }
}

struct BusInner {
    db: sled::Db,
    publish_lock: tokio::sync::Mutex<()>,
    notifiers: dashmap::DashMap<String, Arc<Notify>>,
    visibility_timeout: Duration,
    poll_interval: Duration,
    shutdown: CancellationToken,
    injected_faults: AtomicU32,
}

impl BusInner {
    fn take_injected_fault(&self) -> Result<(), BusError> {
        if self
            .injected_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BusError::Storage(sled::Error::Io(std::io::Error::other(
                "injected storage fault",
            ))));
        }
        Ok(())
    }

    fn notifier(&self, topic: &str) -> Arc<Notify> {
        self.notifiers
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    fn topic_tree(&self, topic: &str) -> Result<sled::Tree, BusError> {
        Ok(self.db.open_tree(format!("bus.topic.{}", topic))?)
    }
}

#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Open (or create) a bus database at `path`
    pub fn open(path: impl AsRef<Path>, config: &BusConfig) -> Result<Self, BusError> {
        let db = sled::open(path.as_ref())?;
        Ok(Self::from_db(db, config))
    }

    /// Share an already-open database
    pub fn from_db(db: sled::Db, config: &BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                db,
                publish_lock: tokio::sync::Mutex::new(()),
                notifiers: dashmap::DashMap::new(),
                visibility_timeout: config.visibility_timeout,
                poll_interval: config.poll_interval,
                shutdown: CancellationToken::new(),
                injected_faults: AtomicU32::new(0),
            }),
        }
    }

    /// Throwaway bus for tests and memory-only deployments
    pub fn temporary(config: &BusConfig) -> Result<Self, BusError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self::from_db(db, config))
    }

    /// Persist `payload` on `topic`; returns once the envelope is durable
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        payload: &T,
        correlation_id: Uuid,
    ) -> Result<MessageId, BusError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(BusError::Closed);
        }
        self.inner.take_injected_fault()?;
        let payload = serde_json::to_value(payload)?;
        let tree = self.inner.topic_tree(topic)?;

        let message = {
            let _guard = self.inner.publish_lock.lock().await;
            let offset = match tree.last()? {
                Some((key, _)) => decode_offset(&key) + 1,
                None => 0,
            };
            let message = Message::new(topic, offset, payload, correlation_id);
            tree.insert(offset.to_be_bytes(), serde_json::to_vec(&message)?)?;
            self.inner.db.flush_async().await?;
            message
        };

        debug!(topic, offset = message.offset, message_id = %message.id, correlation_id = %correlation_id, "Published message");
        metrics::counter!("vigil_bus_published_total", "topic" => topic.to_string()).increment(1);
        self.inner.notifier(topic).notify_waiters();
        Ok(message.id)
    }

    /// Subscribe `subscriber` to `topic`, resuming from its last acknowledged offset
    pub fn subscribe(&self, topic: &str, subscriber: &str) -> Result<Subscription, BusError> {
        let prefix = format!("bus.sub.{}.{}", topic, subscriber);
        let state = self.inner.db.open_tree(format!("{}.state", prefix))?;
        let cursor = state.get(CURSOR_KEY)?.map(|v| decode_offset(&v)).unwrap_or(0);

        info!(topic, subscriber, cursor, "Subscribed to topic");

        Ok(Subscription {
            inner: Arc::new(SubscriptionInner {
                bus: self.inner.clone(),
                topic: topic.to_string(),
                subscriber: subscriber.to_string(),
                messages: self.inner.topic_tree(topic)?,
                state,
                acks: self.inner.db.open_tree(format!("{}.acks", prefix))?,
                attempts: self.inner.db.open_tree(format!("{}.attempts", prefix))?,
                notify: self.inner.notifier(topic),
                progress: Mutex::new(Progress {
                    cursor,
                    in_flight: BTreeMap::new(),
                    ids: HashMap::new(),
                }),
            }),
        })
    }

    /// Number of messages ever published on `topic`
    pub fn topic_len(&self, topic: &str) -> Result<usize, BusError> {
        Ok(self.inner.topic_tree(topic)?.len())
    }

    /// Read-only scan of a topic from `offset`, without touching any subscription
    pub fn read_from(&self, topic: &str, offset: u64, limit: usize) -> Result<Vec<Message>, BusError> {
        self.inner
            .topic_tree(topic)?
            .range(offset.to_be_bytes()..)
            .take(limit)
            .map(|entry| {
                let (_, bytes) = entry?;
                Ok(serde_json::from_slice(&bytes)?)
            })
            .collect()
    }

    /// Wake all subscribers and refuse further work
    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }

    pub async fn flush(&self) -> Result<(), BusError> {
        self.inner.db.flush_async().await?;
        Ok(())
    }

    /// Fail the next `count` publish, delivery or acknowledge calls with a
    /// transient storage error, to exercise recovery paths against a real bus
    pub fn inject_storage_faults(&self, count: u32) {
        warn!(count, "Injecting bus storage faults");
        self.inner.injected_faults.store(count, Ordering::SeqCst);
    }
}

struct Progress {
    /// Every offset below the cursor is acknowledged
    cursor: u64,
    /// Offset → visibility deadline of the outstanding delivery
    in_flight: BTreeMap<u64, Instant>,
    ids: HashMap<MessageId, u64>,
}

struct SubscriptionInner {
    bus: Arc<BusInner>,
    topic: String,
    subscriber: String,
    messages: sled::Tree,
    state: sled::Tree,
    acks: sled::Tree,
    attempts: sled::Tree,
    notify: Arc<Notify>,
    progress: Mutex<Progress>,
}

/// Handle to one subscriber's position on a topic.
///
/// Cloning shares the position, so one clone can drive a stream while
/// another acknowledges.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Wait for the next delivery. Fails only with storage errors or [`BusError::Closed`].
    pub async fn next(&self) -> Result<Message, BusError> {
        let inner = &self.inner;
        loop {
            if inner.bus.shutdown.is_cancelled() {
                return Err(BusError::Closed);
            }

            // Register interest before looking so a concurrent publish is not missed
            let notified = inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.try_next().await? {
                return Ok(message);
            }

            let wait = {
                let progress = inner.progress.lock();
                let now = Instant::now();
                progress
                    .in_flight
                    .values()
                    .map(|deadline| deadline.saturating_duration_since(now))
                    .min()
                    .map_or(inner.bus.poll_interval, |d| d.min(inner.bus.poll_interval))
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(wait) => {}
                _ = inner.bus.shutdown.cancelled() => return Err(BusError::Closed),
            }
        }
    }

    /// Deliver an expired in-flight message or the next undelivered one, if any
    async fn try_next(&self) -> Result<Option<Message>, BusError> {
        let inner = &self.inner;
        inner.bus.take_injected_fault()?;
        let now = Instant::now();

        let candidate = {
            let progress = inner.progress.lock();
            let expired = progress
                .in_flight
                .iter()
                .find(|(_, deadline)| **deadline <= now)
                .map(|(offset, _)| *offset);

            match expired {
                Some(offset) => Some(offset),
                None => {
                    let mut found = None;
                    for entry in inner.messages.range(progress.cursor.to_be_bytes()..) {
                        let (key, _) = entry?;
                        let offset = decode_offset(&key);
                        if progress.in_flight.contains_key(&offset) || inner.acks.contains_key(key)? {
                            continue;
                        }
                        found = Some(offset);
                        break;
                    }
                    found
                }
            }
        };

        let Some(offset) = candidate else {
            return Ok(None);
        };
        let Some(bytes) = inner.messages.get(offset.to_be_bytes())? else {
            return Ok(None);
        };
        let mut message: Message = serde_json::from_slice(&bytes)?;

        let previous = inner
            .attempts
            .get(offset.to_be_bytes())?
            .map(|v| decode_attempts(&v))
            .unwrap_or(0);
        let attempt = previous + 1;
        inner.attempts.insert(offset.to_be_bytes(), &attempt.to_be_bytes())?;
        inner.bus.db.flush_async().await?;

        message.delivery_attempt = attempt;
        {
            let mut progress = inner.progress.lock();
            progress
                .in_flight
                .insert(offset, Instant::now() + inner.bus.visibility_timeout);
            progress.ids.insert(message.id, offset);
        }

        if attempt > 1 {
            warn!(
                topic = %inner.topic,
                subscriber = %inner.subscriber,
                offset,
                delivery_attempt = attempt,
                correlation_id = %message.correlation_id,
                "Redelivering unacknowledged message"
            );
            metrics::counter!("vigil_bus_redelivered_total", "topic" => inner.topic.clone()).increment(1);
        } else {
            debug!(topic = %inner.topic, subscriber = %inner.subscriber, offset, "Delivering message");
        }
        metrics::counter!("vigil_bus_delivered_total", "topic" => inner.topic.clone()).increment(1);

        Ok(Some(message))
    }

    /// Mark a delivered message as processed; it will not be delivered again.
    ///
    /// A storage failure leaves the delivery outstanding, so the call can be
    /// repeated with the same id.
    pub async fn acknowledge(&self, id: &MessageId) -> Result<(), BusError> {
        let inner = &self.inner;
        inner.bus.take_injected_fault()?;
        let cursor = {
            let mut progress = inner.progress.lock();
            let offset = *progress.ids.get(id).ok_or(BusError::UnknownMessage(*id))?;

            inner.acks.insert(offset.to_be_bytes(), &[])?;
            inner.attempts.remove(offset.to_be_bytes())?;
            progress.ids.remove(id);
            progress.in_flight.remove(&offset);

            // Compact contiguous acknowledgements into the cursor
            let mut cursor = progress.cursor;
            while inner.acks.remove(cursor.to_be_bytes())?.is_some() {
                cursor += 1;
            }
            if cursor != progress.cursor {
                progress.cursor = cursor;
                inner.state.insert(CURSOR_KEY, &cursor.to_be_bytes())?;
            }
            cursor
        };
        inner.bus.db.flush_async().await?;

        debug!(topic = %inner.topic, subscriber = %inner.subscriber, message_id = %id, cursor, "Acknowledged message");
        metrics::counter!("vigil_bus_acknowledged_total", "topic" => inner.topic.clone()).increment(1);
        Ok(())
    }

    /// Lowest unacknowledged offset
    pub fn cursor(&self) -> u64 {
        self.inner.progress.lock().cursor
    }

    /// Infinite lazy sequence of deliveries; ends when the bus closes
    pub fn stream(&self) -> impl Stream<Item = Result<Message, BusError>> + Send + 'static {
        stream::unfold(self.clone(), |subscription| async move {
            match subscription.next().await {
                Err(BusError::Closed) => None,
                result => Some((result, subscription)),
            }
        })
    }
}

fn decode_offset(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[8 - len..].copy_from_slice(&bytes[bytes.len() - len..]);
    u64::from_be_bytes(buf)
}

fn decode_attempts(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    let len = bytes.len().min(4);
    buf[4 - len..].copy_from_slice(&bytes[bytes.len() - len..]);
    u32::from_be_bytes(buf)
}
