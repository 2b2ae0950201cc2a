//! Idempotent execution with in-flight coalescing.
//!
//! Concurrent callers supplying the same key share a single upstream
//! execution, and completed outcomes are retained for a bounded window so a
//! retried request observes the original result instead of re-executing.
//!
//! The shared execution runs in a spawned task and publishes through a
//! `watch` channel (one producer, many consumers), so cancelling any
//! individual caller — including the one that started the work — never
//! cancels the execution or blocks the remaining waiters.

use parking_lot::Mutex;
use resilience_core::{compose_key, Clock, ResilienceError, ResilienceResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Idempotency tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// How long completed outcomes remain replayable
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(300),
        }
    }
}

type Shared<T> = watch::Receiver<Option<ResilienceResult<T>>>;

enum Record<T> {
    Pending(Shared<T>),
    Completed {
        result: ResilienceResult<T>,
        completed_at: Instant,
    },
}

/// Tracks in-flight and recently completed executions by key.
pub struct IdempotencyTracker<T> {
    records: Arc<Mutex<HashMap<String, Record<T>>>>,
    config: IdempotencyConfig,
    clock: Arc<dyn Clock>,
}

impl<T> IdempotencyTracker<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new tracker.
    #[must_use]
    pub fn new(config: IdempotencyConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            config,
            clock,
        }
    }

    /// Execute `f` at most once per key.
    ///
    /// - A `Pending` record attaches the caller to the in-flight execution;
    ///   `f` is not invoked.
    /// - A `Completed` record within the retention window replays the stored
    ///   outcome; `f` is not invoked.
    /// - Otherwise `f` runs exactly once in a spawned task and every caller
    ///   with this key observes the identical result.
    pub async fn execute<F, Fut>(&self, key: &str, f: F) -> ResilienceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResilienceResult<T>> + Send + 'static,
    {
        let (mut shared, leader_tx) = {
            let now = self.clock.now();
            let mut records = self.records.lock();

            let stale = matches!(
                records.get(key),
                Some(Record::Completed { completed_at, .. })
                    if now.duration_since(*completed_at) >= self.config.retention
            );
            if stale {
                records.remove(key);
            }

            match records.get(key) {
                Some(Record::Pending(shared)) => {
                    debug!(key, "joining in-flight execution");
                    (shared.clone(), None)
                }
                Some(Record::Completed { result, .. }) => {
                    debug!(key, "replaying completed outcome");
                    return result.clone();
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    records.insert(key.to_string(), Record::Pending(rx.clone()));
                    (rx, Some(tx))
                }
            }
        };

        if let Some(tx) = leader_tx {
            let records = Arc::clone(&self.records);
            let clock = Arc::clone(&self.clock);
            let owned_key = key.to_string();
            let fut = f();
            tokio::spawn(async move {
                let result = fut.await;
                records.lock().insert(
                    owned_key,
                    Record::Completed {
                        result: result.clone(),
                        completed_at: clock.now(),
                    },
                );
                // Publish only after the record is stored so every waiter
                // observes the completed state and its side effects.
                let _ = tx.send(Some(result));
            });
        }

        loop {
            {
                let value = shared.borrow_and_update();
                if let Some(result) = value.as_ref() {
                    return result.clone();
                }
            }
            if shared.changed().await.is_err() {
                // The execution task died without publishing (panic). Drop
                // the stale Pending record so a later caller can re-execute.
                let mut records = self.records.lock();
                let abandoned = matches!(
                    records.get(key),
                    Some(Record::Pending(rx)) if rx.same_channel(&shared)
                );
                if abandoned {
                    records.remove(key);
                }
                warn!(key, "in-flight execution abandoned");
                return Err(ResilienceError::internal(
                    "idempotent execution abandoned before completing",
                ));
            }
        }
    }

    /// Number of keys with an execution currently in flight.
    pub fn pending_count(&self) -> usize {
        self.records
            .lock()
            .values()
            .filter(|record| matches!(record, Record::Pending(_)))
            .count()
    }

    /// Drop completed records whose retention window has elapsed, and
    /// pending records whose execution task died without publishing.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        let retention = self.config.retention;
        self.records.lock().retain(|_, record| match record {
            Record::Pending(shared) => shared.has_changed().is_ok(),
            Record::Completed { completed_at, .. } => {
                now.duration_since(*completed_at) < retention
            }
        });
    }

    /// Remove every record, pending handles included.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

/// Deterministic, collision-resistant key from a scope and parts.
///
/// Stable across retries: repeated submissions with the same inputs map to
/// the same key.
#[must_use]
pub fn generate_key(scope: &str, parts: &[&str]) -> String {
    compose_key(scope, parts)
}

/// Key salted with the current time bucket.
///
/// Retries landing in a later bucket will *not* deduplicate; callers needing
/// idempotency across retries should use [`generate_key`] or supply their own
/// stable key.
#[must_use]
pub fn generate_bucketed_key(scope: &str, parts: &[&str], bucket: Duration) -> String {
    let bucket_secs = bucket.as_secs().max(1);
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        / bucket_secs;
    let stamp = stamp.to_string();

    let mut all: Vec<&str> = parts.to_vec();
    all.push(&stamp);
    compose_key(scope, &all)
}
