//! Outbound delivery with retries and dead-lettering.
//!
//! The [`Outbox`] wraps every outbound send in an attempt loop. A message
//! stays in the pending set while attempts are in flight; exhausting the
//! attempt budget moves it to the dead-letter set, where an operator (or a
//! periodic task) can inspect and requeue it. Every outcome is counted in a
//! shared [`StatsCollector`] under `outbox.sent`, `outbox.retry` and
//! `outbox.deadletter`.
//!
//! Cancellation aborts the loop between attempts and leaves the message
//! pending, so a shutdown never silently loses or dead-letters messages.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use quill_core::TransportError;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::OutboxError;
use crate::stats::StatsCollector;

/// Configuration for [`Outbox`].
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Total attempts per message, the first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub retry_delay: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// A message that exhausted its attempt budget.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Outbox message id.
    pub id: String,
    /// The undelivered payload.
    pub payload: Value,
    /// Attempts made before giving up.
    pub attempts: u32,
}

/// Retrying delivery wrapper for outbound messages.
pub struct Outbox {
    config: OutboxConfig,
    pending: DashMap<String, Value>,
    dead: DashMap<String, DeadLetter>,
    stats: Arc<StatsCollector>,
}

impl Outbox {
    /// Creates an outbox with its own stats collector.
    pub fn new(config: OutboxConfig) -> Self {
        Self::with_stats(config, Arc::new(StatsCollector::new()))
    }

    /// Creates an outbox reporting into a shared stats collector.
    pub fn with_stats(config: OutboxConfig, stats: Arc<StatsCollector>) -> Self {
        Self {
            config,
            pending: DashMap::new(),
            dead: DashMap::new(),
            stats,
        }
    }

    /// The stats collector this outbox reports into.
    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    /// Delivers `payload` through `invoke`, retrying on failure.
    ///
    /// Returns `Ok` once an attempt succeeds. After `max_attempts` failures
    /// the message is dead-lettered and [`OutboxError::DeadLettered`] is
    /// returned. Cancellation returns [`OutboxError::Cancelled`] with the
    /// message still pending.
    pub async fn send<F, Fut>(
        &self,
        id: impl Into<String>,
        payload: Value,
        invoke: F,
        cancel: &CancellationToken,
    ) -> Result<(), OutboxError>
    where
        F: Fn(Value) -> Fut,
        Fut: Future<Output = Result<(), TransportError>>,
    {
        let id = id.into();
        self.pending.insert(id.clone(), payload.clone());

        let mut delay = self.config.retry_delay;
        for attempt in 1..=self.config.max_attempts {
            if cancel.is_cancelled() {
                return Err(OutboxError::Cancelled { id });
            }
            if attempt > 1 {
                self.stats.inc("outbox.retry");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(OutboxError::Cancelled { id }),
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = delay.saturating_mul(2);
            }

            match invoke(payload.clone()).await {
                Ok(()) => {
                    self.pending.remove(&id);
                    self.stats.inc("outbox.sent");
                    debug!(%id, attempt, "message delivered");
                    return Ok(());
                }
                Err(error) => {
                    warn!(%id, attempt, %error, "delivery attempt failed");
                }
            }
        }

        let attempts = self.config.max_attempts;
        self.pending.remove(&id);
        self.dead.insert(
            id.clone(),
            DeadLetter {
                id: id.clone(),
                payload,
                attempts,
            },
        );
        self.stats.inc("outbox.deadletter");
        Err(OutboxError::DeadLettered { id, attempts })
    }

    /// Messages with delivery currently in flight (or cancelled mid-flight).
    pub fn pending(&self) -> Vec<(String, Value)> {
        self.pending
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Messages that exhausted their attempt budget.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead.iter().map(|e| e.value().clone()).collect()
    }

    /// Removes a dead letter and hands its payload back for a fresh
    /// [`send`](Outbox::send).
    pub fn requeue_dead_letter(&self, id: &str) -> Result<Value, OutboxError> {
        self.dead
            .remove(id)
            .map(|(_, letter)| letter.payload)
            .ok_or_else(|| OutboxError::UnknownDeadLetter(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> OutboxConfig {
        OutboxConfig {
            max_attempts,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn first_attempt_success_counts_once() {
        let outbox = Outbox::new(fast_config(3));
        outbox
            .send(
                "m1",
                Value::from("hi"),
                |_| async { Ok(()) },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outbox.stats().get("outbox.sent"), 1);
        assert_eq!(outbox.stats().get("outbox.retry"), 0);
        assert!(outbox.pending().is_empty());
    }

    #[tokio::test]
    async fn transient_failure_retries_then_succeeds() {
        let outbox = Outbox::new(fast_config(5));
        let calls = AtomicU32::new(0);
        outbox
            .send(
                "m1",
                Value::from("hi"),
                |_| {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(TransportError::send_failed("flaky"))
                        } else {
                            Ok(())
                        }
                    }
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outbox.stats().get("outbox.retry"), 2);
        assert_eq!(outbox.stats().get("outbox.sent"), 1);
    }

    #[tokio::test]
    async fn exhaustion_dead_letters_and_requeue_recovers() {
        let outbox = Outbox::new(fast_config(3));
        let err = outbox
            .send(
                "m1",
                Value::from("hi"),
                |_| async { Err(TransportError::send_failed("down")) },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, OutboxError::DeadLettered { attempts: 3, .. }));
        assert_eq!(outbox.stats().get("outbox.retry"), 2);
        assert_eq!(outbox.stats().get("outbox.deadletter"), 1);
        assert!(outbox.pending().is_empty());
        assert_eq!(outbox.dead_letters().len(), 1);

        let payload = outbox.requeue_dead_letter("m1").unwrap();
        assert_eq!(payload, Value::from("hi"));
        assert!(outbox.dead_letters().is_empty());
        assert!(matches!(
            outbox.requeue_dead_letter("m1"),
            Err(OutboxError::UnknownDeadLetter(_))
        ));
    }

    #[tokio::test]
    async fn cancellation_keeps_message_pending() {
        let outbox = Outbox::new(OutboxConfig {
            max_attempts: 5,
            retry_delay: Duration::from_secs(3600),
        });
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = outbox
            .send(
                "m1",
                Value::from("hi"),
                |_| async { Err(TransportError::send_failed("down")) },
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OutboxError::Cancelled { .. }));
        assert_eq!(outbox.pending().len(), 1);
    }
}
