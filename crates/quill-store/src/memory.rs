//! In-memory store backend.
//!
//! Entries live in a [`DashMap`]; the map's entry API gives every primitive
//! an exclusive critical section per key, which makes `increment`,
//! `set_if_absent` and `compare_and_swap` atomic with respect to concurrent
//! callers in this process. This backend is **not** shared across processes
//! and therefore not suitable for cluster-wide leader election.
//!
//! Expired entries are invisible to reads and physically purged by a
//! background sweep task owned by the store. The store must be created
//! inside a Tokio runtime when a sweep interval is configured.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::StoreResult;
use crate::store::{StateStore, expiry_from_ttl, is_expired, now_ms};

type EntryKey = (String, String);

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Value,
    expires_at: Option<i64>,
}

impl StoredEntry {
    fn expired(&self, now: i64) -> bool {
        is_expired(self.expires_at, now)
    }
}

/// Configuration for [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// How often the background sweep purges expired entries.
    /// `None` disables the sweep task (expiry stays lazy-on-read).
    pub sweep_interval: Option<Duration>,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Some(Duration::from_secs(60)),
        }
    }
}

/// In-process [`StateStore`] backend.
pub struct MemoryStore {
    entries: Arc<DashMap<EntryKey, StoredEntry>>,
    shutdown: CancellationToken,
}

impl MemoryStore {
    /// Creates a store with the default sweep interval.
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    /// Creates a store with explicit configuration.
    pub fn with_config(config: MemoryStoreConfig) -> Self {
        let entries: Arc<DashMap<EntryKey, StoredEntry>> = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();

        if let Some(interval) = config.sweep_interval {
            let entries = Arc::clone(&entries);
            let token = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            let purged = sweep(&entries);
                            if purged > 0 {
                                debug!(purged, "memory store sweep");
                            }
                        }
                    }
                }
            });
        }

        Self { entries, shutdown }
    }

    /// Stops the background sweep task.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Number of physically present entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entries are physically present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key(scope: &str, key: &str) -> EntryKey {
        (scope.to_string(), key.to_string())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn sweep(entries: &DashMap<EntryKey, StoredEntry>) -> u64 {
    let now = now_ms();
    let before = entries.len();
    entries.retain(|_, e| !e.expired(now));
    before.saturating_sub(entries.len()) as u64
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, scope: &str, key: &str) -> StoreResult<Option<Value>> {
        let k = Self::key(scope, key);
        let now = now_ms();

        let live = {
            match self.entries.get(&k) {
                Some(entry) if !entry.expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => false,
                None => return Ok(None),
            }
        };
        debug_assert!(!live);

        // Lazy delete, re-checking under the entry lock.
        self.entries.remove_if(&k, |_, e| e.expired(now_ms()));
        trace!(scope, key, "expired entry removed on read");
        Ok(None)
    }

    async fn set(
        &self,
        scope: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let now = now_ms();
        self.entries.insert(
            Self::key(scope, key),
            StoredEntry {
                value,
                expires_at: expiry_from_ttl(now, ttl),
            },
        );
        Ok(())
    }

    async fn remove(&self, scope: &str, key: &str) -> StoreResult<bool> {
        let now = now_ms();
        Ok(self
            .entries
            .remove(&Self::key(scope, key))
            .is_some_and(|(_, e)| !e.expired(now)))
    }

    async fn increment(
        &self,
        scope: &str,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> StoreResult<i64> {
        let now = now_ms();
        match self.entries.entry(Self::key(scope, key)) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let expired = entry.expired(now);
                let current = if expired {
                    0
                } else {
                    entry.value.as_i64().unwrap_or(0)
                };
                let next = current.saturating_add(delta);
                entry.value = Value::from(next);
                entry.expires_at = match ttl {
                    Some(_) => expiry_from_ttl(now, ttl),
                    None if expired => None,
                    None => entry.expires_at,
                };
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredEntry {
                    value: Value::from(delta),
                    expires_at: expiry_from_ttl(now, ttl),
                });
                Ok(delta)
            }
        }
    }

    async fn set_if_absent(
        &self,
        scope: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let now = now_ms();
        match self.entries.entry(Self::key(scope, key)) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expired(now) {
                    occupied.insert(StoredEntry {
                        value,
                        expires_at: expiry_from_ttl(now, ttl),
                    });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredEntry {
                    value,
                    expires_at: expiry_from_ttl(now, ttl),
                });
                Ok(true)
            }
        }
    }

    async fn compare_and_swap(
        &self,
        scope: &str,
        key: &str,
        expected: &Value,
        value: Value,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let now = now_ms();
        match self.entries.entry(Self::key(scope, key)) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get();
                if entry.expired(now) || entry.value != *expected {
                    return Ok(false);
                }
                occupied.insert(StoredEntry {
                    value,
                    expires_at: expiry_from_ttl(now, ttl),
                });
                Ok(true)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    async fn purge_expired(&self) -> StoreResult<u64> {
        Ok(sweep(&self.entries))
    }
}
