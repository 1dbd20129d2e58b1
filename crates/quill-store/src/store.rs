//! The state-store contract.
//!
//! A [`StateStore`] is a persistent key-value store partitioned by scope,
//! with TTL expiry and a small set of **atomic** primitives. It is the
//! single source of truth for all cross-process coordination in Quill:
//! scheduler leader locks, scene state, counters.
//!
//! # Semantics every backend must honor
//!
//! - [`get`](StateStore::get) never returns an expired entry; an expired
//!   entry behaves exactly like an absent one and is lazily deleted on read.
//! - [`set`](StateStore::set) replaces the entry *including* its expiry
//!   (`ttl = None` means no expiry).
//! - [`increment`](StateStore::increment) is an atomic read-modify-write:
//!   an absent or expired entry counts as `0`; the ttl is re-applied on each
//!   call when supplied, otherwise the current expiry is kept.
//! - [`set_if_absent`](StateStore::set_if_absent) atomically creates the
//!   entry only when no live entry exists — the mutex primitive.
//! - [`compare_and_swap`](StateStore::compare_and_swap) atomically replaces
//!   the entry only when the stored value equals `expected` — the optimistic
//!   concurrency primitive for composite records.
//!
//! Atomicity is with respect to concurrent callers in the same process for
//! every backend, and additionally across processes for the SQLite backend.
//! The file backend documents its single-process limitation.
//!
//! Values are stored as [`serde_json::Value`]; the typed helpers live in
//! [`StateStoreExt`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

/// Persistent key-value store with TTL and atomic primitives.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the live value under `(scope, key)`, or `None`.
    async fn get(&self, scope: &str, key: &str) -> StoreResult<Option<Value>>;

    /// Stores `value` under `(scope, key)`, replacing any previous entry
    /// and expiry.
    async fn set(
        &self,
        scope: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> StoreResult<()>;

    /// Deletes the entry. Returns `true` if a live value was removed.
    async fn remove(&self, scope: &str, key: &str) -> StoreResult<bool>;

    /// Atomically adds `delta` to the stored integer, creating at `0` when
    /// absent or expired, and returns the new value.
    async fn increment(
        &self,
        scope: &str,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> StoreResult<i64>;

    /// Atomically creates the entry only if no live entry exists.
    /// Returns `true` on creation.
    async fn set_if_absent(
        &self,
        scope: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> StoreResult<bool>;

    /// Atomically replaces the entry only if the stored value equals
    /// `expected`. Returns `true` on success; `false` when the entry is
    /// absent, expired, or holds a different value.
    async fn compare_and_swap(
        &self,
        scope: &str,
        key: &str,
        expected: &Value,
        value: Value,
        ttl: Option<Duration>,
    ) -> StoreResult<bool>;

    /// Runs one sweep pass, physically deleting expired entries.
    /// Returns the number of entries purged.
    async fn purge_expired(&self) -> StoreResult<u64>;
}

/// A shareable, type-erased state store.
pub type BoxedStore = Arc<dyn StateStore>;

/// Typed convenience layer over [`StateStore`], serializing values through
/// serde.
#[async_trait]
pub trait StateStoreExt: StateStore {
    /// Typed [`StateStore::get`].
    async fn get_json<T>(&self, scope: &str, key: &str) -> StoreResult<Option<T>>
    where
        T: DeserializeOwned;

    /// Typed [`StateStore::set`].
    async fn set_json<T>(
        &self,
        scope: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> StoreResult<()>
    where
        T: Serialize + Sync;

    /// Typed [`StateStore::set_if_absent`].
    async fn set_if_absent_json<T>(
        &self,
        scope: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> StoreResult<bool>
    where
        T: Serialize + Sync;

    /// Typed [`StateStore::compare_and_swap`].
    async fn compare_and_swap_json<T>(
        &self,
        scope: &str,
        key: &str,
        expected: &T,
        value: &T,
        ttl: Option<Duration>,
    ) -> StoreResult<bool>
    where
        T: Serialize + Sync;
}

#[async_trait]
impl<S: StateStore + ?Sized> StateStoreExt for S {
    async fn get_json<T>(&self, scope: &str, key: &str) -> StoreResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.get(scope, key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StoreError::serde(scope, key, e)),
            None => Ok(None),
        }
    }

    async fn set_json<T>(
        &self,
        scope: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> StoreResult<()>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value).map_err(|e| StoreError::serde(scope, key, e))?;
        self.set(scope, key, value, ttl).await
    }

    async fn set_if_absent_json<T>(
        &self,
        scope: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> StoreResult<bool>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value).map_err(|e| StoreError::serde(scope, key, e))?;
        self.set_if_absent(scope, key, value, ttl).await
    }

    async fn compare_and_swap_json<T>(
        &self,
        scope: &str,
        key: &str,
        expected: &T,
        value: &T,
        ttl: Option<Duration>,
    ) -> StoreResult<bool>
    where
        T: Serialize + Sync,
    {
        let expected =
            serde_json::to_value(expected).map_err(|e| StoreError::serde(scope, key, e))?;
        let value = serde_json::to_value(value).map_err(|e| StoreError::serde(scope, key, e))?;
        self.compare_and_swap(scope, key, &expected, value, ttl).await
    }
}

/// Current wall-clock time as millisecond Unix timestamp.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Converts an optional ttl into an absolute millisecond expiry.
pub(crate) fn expiry_from_ttl(now: i64, ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|d| now.saturating_add(d.as_millis() as i64))
}

/// Returns `true` if `expires_at` lies at or before `now`.
pub(crate) fn is_expired(expires_at: Option<i64>, now: i64) -> bool {
    matches!(expires_at, Some(at) if at <= now)
}
