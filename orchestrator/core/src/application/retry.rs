// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Timeout / Retry Wrapper
//!
//! Cross-cutting policy for every externally-facing call: model invocations,
//! verification runs and bus I/O.
//!
//! - Attempt 0 runs under `base_timeout`.
//! - Retry *n* runs under `base_timeout × multipliers[n-1]` (default
//!   2×, 3×, 5×, 10×) and is preceded by a backoff of `backoff × multiplier`.
//! - Only timeouts and errors whose [`Retryable::is_transient`] is true are
//!   retried; anything else returns immediately.
//! - After `max_retries` retries the last failure is surfaced. Partial
//!   results are never passed on.
//! - [`RetryPolicy::run_untimed`] applies the same rules without a
//!   per-attempt timeout, for calls that block until work arrives.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::errors::{OrchestratorError, Retryable};
use crate::domain::node_config::RetryConfig;

#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("{operation} timed out after {attempts} attempt(s) (last timeout {last_timeout:?})")]
    TimedOut {
        operation: String,
        attempts: u32,
        last_timeout: Duration,
    },

    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: E,
    },

    #[error("{operation} failed permanently: {source}")]
    Permanent {
        operation: String,
        #[source]
        source: E,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::TimedOut { attempts, .. } | RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Permanent { .. } => 1,
        }
    }

    /// The last error returned by the operation, if it did not time out
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::TimedOut { .. } => None,
            RetryError::Exhausted { source, .. } | RetryError::Permanent { source, .. } => Some(source),
        }
    }
}

impl<E> From<RetryError<E>> for OrchestratorError
where
    E: std::error::Error + Into<OrchestratorError> + 'static,
{
    fn from(err: RetryError<E>) -> Self {
        match err {
            RetryError::Permanent { source, .. } => source.into(),
            exhausted => OrchestratorError::Transient(exhausted.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_timeout: Duration,
    multipliers: Vec<f64>,
    max_retries: u32,
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(base_timeout: Duration) -> Self {
        Self {
            base_timeout,
            ..Self::default()
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_timeout: config.base_timeout,
            multipliers: config.multipliers.clone(),
            max_retries: config.max_retries,
            backoff: config.backoff,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn multiplier(&self, retry: u32) -> f64 {
        if retry == 0 {
            return 1.0;
        }
        let idx = (retry as usize - 1).min(self.multipliers.len().saturating_sub(1));
        self.multipliers.get(idx).copied().unwrap_or(1.0)
    }

    /// Timeout for attempt `attempt` (0 = first try)
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        self.base_timeout.mul_f64(self.multiplier(attempt))
    }

    /// Delay slept before retry `retry` (1-based)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        self.backoff.mul_f64(self.multiplier(retry))
    }

    pub async fn run<T, E, F, Fut>(&self, operation: &str, f: F) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + Retryable + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_counted(operation, f).await.0
    }

    /// Like [`RetryPolicy::run`], also returning how many attempts were made
    pub async fn run_counted<T, E, F, Fut>(&self, operation: &str, f: F) -> (Result<T, RetryError<E>>, u32)
    where
        E: std::error::Error + Retryable + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.attempt(operation, f, true).await
    }

    /// Retry transient failures without bounding how long one attempt may wait
    pub async fn run_untimed<T, E, F, Fut>(&self, operation: &str, f: F) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + Retryable + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.attempt(operation, f, false).await.0
    }

    async fn attempt<T, E, F, Fut>(&self, operation: &str, mut f: F, timed: bool) -> (Result<T, RetryError<E>>, u32)
    where
        E: std::error::Error + Retryable + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let timeout = self.timeout_for(attempt);
            let attempts = attempt + 1;

            let result = if timed {
                tokio::time::timeout(timeout, f()).await
            } else {
                Ok(f().await)
            };
            let failure = match result {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        debug!(operation, attempts, "Operation succeeded after retry");
                    }
                    return (Ok(value), attempts);
                }
                Ok(Err(err)) if !err.is_transient() => {
                    return (
                        Err(RetryError::Permanent {
                            operation: operation.to_string(),
                            source: err,
                        }),
                        attempts,
                    );
                }
                Ok(Err(err)) => Err(err),
                Err(_) => Ok(timeout),
            };

            if attempt >= self.max_retries {
                let err = match failure {
                    Ok(last_timeout) => RetryError::TimedOut {
                        operation: operation.to_string(),
                        attempts,
                        last_timeout,
                    },
                    Err(source) => RetryError::Exhausted {
                        operation: operation.to_string(),
                        attempts,
                        source,
                    },
                };
                warn!(operation, attempts, error = %err, "Retries exhausted");
                metrics::counter!("vigil_retry_exhausted_total", "operation" => operation.to_string()).increment(1);
                return (Err(err), attempts);
            }

            attempt += 1;
            let delay = self.backoff_for(attempt);
            match &failure {
                Ok(elapsed) => warn!(operation, attempt, timeout = ?elapsed, next_timeout = ?self.timeout_for(attempt), "Operation timed out, retrying"),
                Err(err) => warn!(operation, attempt, error = %err, next_timeout = ?self.timeout_for(attempt), "Transient failure, retrying"),
            }
            metrics::counter!("vigil_retries_total", "operation" => operation.to_string()).increment(1);
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::worker::WorkerError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(50)).with_backoff(Duration::from_millis(1))
    }

    #[test]
    fn test_timeouts_escalate_by_multiplier() {
        let policy = RetryPolicy::new(Duration::from_secs(10));
        assert_eq!(policy.timeout_for(0), Duration::from_secs(10));
        assert_eq!(policy.timeout_for(1), Duration::from_secs(20));
        assert_eq!(policy.timeout_for(2), Duration::from_secs(30));
        assert_eq!(policy.timeout_for(3), Duration::from_secs(50));
        assert_eq!(policy.timeout_for(4), Duration::from_secs(100));
        // Beyond the table the last multiplier holds
        assert_eq!(policy.timeout_for(9), Duration::from_secs(100));
        assert_eq!(policy.max_retries(), 4);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let (result, attempts) = fast_policy()
            .run_counted("flaky", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(WorkerError::Transient("503".into()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = fast_policy()
            .run("reject", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(WorkerError::Rejected("unsupported".into()))
                }
            })
            .await;
        assert!(matches!(result, Err(RetryError::Permanent { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_incomplete_context_is_retried_then_surfaced() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = fast_policy()
            .with_max_retries(2)
            .run("partial", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(WorkerError::IncompleteContext("missing patch".into()))
                }
            })
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.attempts(), 3);
        assert!(matches!(err.last_error(), Some(WorkerError::IncompleteContext(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_slow_operation_gets_longer_timeouts() {
        let policy = RetryPolicy::new(Duration::from_millis(10)).with_backoff(Duration::from_millis(1));
        let (result, attempts) = policy
            .run_counted("slow", || async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Ok::<_, WorkerError>(42)
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert!(attempts >= 4, "expected escalation past the 30ms timeout, got {} attempts", attempts);
    }

    #[tokio::test]
    async fn test_untimed_run_waits_and_retries_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let policy = RetryPolicy::new(Duration::from_millis(5)).with_backoff(Duration::from_millis(1));
        let result = policy
            .run_untimed("wait", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(WorkerError::Transient("disk busy".into()));
                    }
                    // Far longer than the base timeout
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    Ok("delivered")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "delivered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retry_errors_map_onto_orchestrator_classes() {
        use crate::domain::message::MessageId;
        use crate::infrastructure::message_bus::BusError;

        let permanent: RetryError<BusError> = RetryError::Permanent {
            operation: "ack:signals".into(),
            source: BusError::UnknownMessage(MessageId::new()),
        };
        let exhausted: RetryError<BusError> = RetryError::Exhausted {
            operation: "publish:signals".into(),
            attempts: 3,
            source: BusError::Storage(sled::Error::Io(std::io::Error::other("disk unplugged"))),
        };
        assert_eq!(OrchestratorError::from(permanent).kind(), "validation");
        assert_eq!(OrchestratorError::from(exhausted).kind(), "transient");
    }

    #[tokio::test]
    async fn test_timeouts_exhaust() {
        let policy = RetryPolicy::new(Duration::from_millis(5))
            .with_backoff(Duration::from_millis(1))
            .with_max_retries(1);
        let result = policy
            .run("hang", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, WorkerError>(())
            })
            .await;
        match result {
            Err(RetryError::TimedOut { attempts, last_timeout, .. }) => {
                assert_eq!(attempts, 2);
                assert_eq!(last_timeout, Duration::from_millis(10));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
