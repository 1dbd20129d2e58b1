//! Filesystem store backend.
//!
//! Each entry maps to two files under the base directory:
//!
//! ```text
//! {base}/{scope}/{key}.json   the JSON value
//! {base}/{scope}/{key}.meta   absolute expiry in Unix millis (absent = no ttl)
//! ```
//!
//! Scope and key are sanitized to `[A-Za-z0-9._-]` before hitting the
//! filesystem, so distinct raw keys can collide after sanitization; callers
//! that need exotic keys should hash them first.
//!
//! Writes go through a temp file in the same directory followed by a rename,
//! so readers never observe a half-written value. Every operation serializes
//! on a per-key async lock, which gives the atomic primitives their
//! guarantees **within this process only** — concurrent processes sharing a
//! base directory are not coordinated. Use the SQLite backend for that.
//!
//! With a `flush_interval` configured, `set` lands in an in-memory write
//! buffer and is persisted by a background flusher; reads and the atomic
//! primitives still observe buffered values immediately.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::{StateStore, expiry_from_ttl, is_expired, now_ms};

type EntryKey = (String, String);

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
struct PendingWrite {
    value: Value,
    expires_at: Option<i64>,
}

/// Configuration for [`FileStore`].
#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    /// Root directory for all scopes.
    pub base_dir: PathBuf,
    /// When set, `set` calls are buffered in memory and flushed to disk
    /// at this interval. `None` writes through immediately.
    pub flush_interval: Option<Duration>,
    /// How often the background sweep purges expired entries from disk.
    /// `None` disables the sweep task.
    pub sweep_interval: Option<Duration>,
}

impl FileStoreConfig {
    /// Write-through configuration with the default sweep interval.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            flush_interval: None,
            sweep_interval: Some(Duration::from_secs(300)),
        }
    }
}

struct Inner {
    base: PathBuf,
    pending: DashMap<EntryKey, PendingWrite>,
    locks: DashMap<EntryKey, Arc<Mutex<()>>>,
}

/// Filesystem-backed [`StateStore`].
pub struct FileStore {
    inner: Arc<Inner>,
    buffered: bool,
    shutdown: CancellationToken,
}

impl FileStore {
    /// Opens the store, creating the base directory if needed, and spawns
    /// the configured background tasks.
    pub async fn open(config: FileStoreConfig) -> StoreResult<Self> {
        fs::create_dir_all(&config.base_dir)
            .await
            .map_err(|e| StoreError::io(&config.base_dir, e))?;

        let inner = Arc::new(Inner {
            base: config.base_dir,
            pending: DashMap::new(),
            locks: DashMap::new(),
        });
        let shutdown = CancellationToken::new();

        if let Some(interval) = config.flush_interval {
            let inner = Arc::clone(&inner);
            let token = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(error) = flush_all(&inner).await {
                                warn!(%error, "file store flush failed");
                            }
                        }
                    }
                }
                // Final drain so buffered writes survive shutdown.
                if let Err(error) = flush_all(&inner).await {
                    warn!(%error, "file store final flush failed");
                }
            });
        }

        if let Some(interval) = config.sweep_interval {
            let inner = Arc::clone(&inner);
            let token = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            match sweep(&inner).await {
                                Ok(purged) if purged > 0 => {
                                    debug!(purged, "file store sweep");
                                }
                                Ok(_) => {}
                                Err(error) => warn!(%error, "file store sweep failed"),
                            }
                        }
                    }
                }
            });
        }

        Ok(Self {
            inner,
            buffered: config.flush_interval.is_some(),
            shutdown,
        })
    }

    /// Flushes buffered writes and stops the background tasks.
    pub async fn close(&self) -> StoreResult<()> {
        self.shutdown.cancel();
        flush_all(&self.inner).await
    }

    fn key(scope: &str, key: &str) -> EntryKey {
        (sanitize(scope), sanitize(key))
    }

    fn lock_for(&self, k: &EntryKey) -> Arc<Mutex<()>> {
        self.inner.locks.entry(k.clone()).or_default().clone()
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn data_path(base: &Path, k: &EntryKey) -> PathBuf {
    base.join(&k.0).join(format!("{}.json", k.1))
}

fn meta_path(base: &Path, k: &EntryKey) -> PathBuf {
    base.join(&k.0).join(format!("{}.meta", k.1))
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        "{file_name}.{}.{}.tmp",
        std::process::id(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed),
    ));
    fs::write(&tmp, bytes)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(path, e))
}

async fn remove_if_exists(path: &Path) -> StoreResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Reads the raw on-disk entry, expired or not. `None` when absent.
async fn read_entry(inner: &Inner, k: &EntryKey) -> StoreResult<Option<(Value, Option<i64>)>> {
    let data = data_path(&inner.base, k);
    let bytes = match fs::read(&data).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(&data, e)),
    };
    let value: Value =
        serde_json::from_slice(&bytes).map_err(|e| StoreError::serde(&k.0, &k.1, e))?;

    let meta = meta_path(&inner.base, k);
    let expires_at = match fs::read_to_string(&meta).await {
        Ok(text) => text.trim().parse::<i64>().ok(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(StoreError::io(&meta, e)),
    };
    Ok(Some((value, expires_at)))
}

async fn write_entry(
    inner: &Inner,
    k: &EntryKey,
    value: &Value,
    expires_at: Option<i64>,
) -> StoreResult<()> {
    let scope_dir = inner.base.join(&k.0);
    fs::create_dir_all(&scope_dir)
        .await
        .map_err(|e| StoreError::io(&scope_dir, e))?;

    let bytes = serde_json::to_vec(value).map_err(|e| StoreError::serde(&k.0, &k.1, e))?;
    write_atomic(&data_path(&inner.base, k), &bytes).await?;

    let meta = meta_path(&inner.base, k);
    match expires_at {
        Some(at) => write_atomic(&meta, at.to_string().as_bytes()).await?,
        None => {
            remove_if_exists(&meta).await?;
        }
    }
    Ok(())
}

async fn delete_entry(inner: &Inner, k: &EntryKey) -> StoreResult<bool> {
    let had_data = remove_if_exists(&data_path(&inner.base, k)).await?;
    remove_if_exists(&meta_path(&inner.base, k)).await?;
    Ok(had_data)
}

/// Caller must hold the key lock.
async fn flush_key_locked(inner: &Inner, k: &EntryKey) -> StoreResult<()> {
    if let Some((_, pending)) = inner.pending.remove(k) {
        write_entry(inner, k, &pending.value, pending.expires_at).await?;
    }
    Ok(())
}

/// Current state of a key as seen through the buffer, expired filtered out.
/// Caller must hold the key lock.
async fn load_live_locked(inner: &Inner, k: &EntryKey) -> StoreResult<Option<(Value, Option<i64>)>> {
    let now = now_ms();
    if let Some(pending) = inner.pending.get(k) {
        if is_expired(pending.expires_at, now) {
            return Ok(None);
        }
        return Ok(Some((pending.value.clone(), pending.expires_at)));
    }
    match read_entry(inner, k).await? {
        Some((_, expires_at)) if is_expired(expires_at, now) => {
            delete_entry(inner, k).await?;
            Ok(None)
        }
        other => Ok(other),
    }
}

async fn flush_all(inner: &Inner) -> StoreResult<()> {
    let keys: Vec<EntryKey> = inner.pending.iter().map(|e| e.key().clone()).collect();
    for k in keys {
        let lock = inner.locks.entry(k.clone()).or_default().clone();
        let _guard = lock.lock().await;
        flush_key_locked(inner, &k).await?;
    }
    Ok(())
}

async fn sweep(inner: &Inner) -> StoreResult<u64> {
    let now = now_ms();
    let mut purged = 0u64;

    let mut scopes = match fs::read_dir(&inner.base).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StoreError::io(&inner.base, e)),
    };
    while let Some(scope) = scopes
        .next_entry()
        .await
        .map_err(|e| StoreError::io(&inner.base, e))?
    {
        let scope_path = scope.path();
        if !scope_path.is_dir() {
            continue;
        }
        let scope_name = scope.file_name().to_string_lossy().into_owned();

        let mut files = match fs::read_dir(&scope_path).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(StoreError::io(&scope_path, e)),
        };
        while let Some(file) = files
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&scope_path, e))?
        {
            let path = file.path();
            if path.extension().is_none_or(|ext| ext != "meta") {
                continue;
            }
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };

            let k = (scope_name.clone(), stem);
            let lock = inner.locks.entry(k.clone()).or_default().clone();
            let _guard = lock.lock().await;

            // A buffered write supersedes whatever is on disk.
            if inner.pending.contains_key(&k) {
                continue;
            }
            let expires_at = match fs::read_to_string(&path).await {
                Ok(text) => text.trim().parse::<i64>().ok(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(&path, e)),
            };
            if is_expired(expires_at, now) && delete_entry(inner, &k).await? {
                purged += 1;
            }
        }
    }
    Ok(purged)
}

#[async_trait]
impl StateStore for FileStore {
    async fn get(&self, scope: &str, key: &str) -> StoreResult<Option<Value>> {
        let k = Self::key(scope, key);
        let lock = self.lock_for(&k);
        let _guard = lock.lock().await;
        Ok(load_live_locked(&self.inner, &k).await?.map(|(v, _)| v))
    }

    async fn set(
        &self,
        scope: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let k = Self::key(scope, key);
        let lock = self.lock_for(&k);
        let _guard = lock.lock().await;

        let expires_at = expiry_from_ttl(now_ms(), ttl);
        if self.buffered {
            self.inner.pending.insert(k, PendingWrite { value, expires_at });
            Ok(())
        } else {
            write_entry(&self.inner, &k, &value, expires_at).await
        }
    }

    async fn remove(&self, scope: &str, key: &str) -> StoreResult<bool> {
        let k = Self::key(scope, key);
        let lock = self.lock_for(&k);
        let _guard = lock.lock().await;

        let was_live = load_live_locked(&self.inner, &k).await?.is_some();
        self.inner.pending.remove(&k);
        delete_entry(&self.inner, &k).await?;
        Ok(was_live)
    }

    async fn increment(
        &self,
        scope: &str,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> StoreResult<i64> {
        let k = Self::key(scope, key);
        let lock = self.lock_for(&k);
        let _guard = lock.lock().await;
        flush_key_locked(&self.inner, &k).await?;

        let now = now_ms();
        let (current, prev_expiry) = match load_live_locked(&self.inner, &k).await? {
            Some((value, expires_at)) => (value.as_i64().unwrap_or(0), expires_at),
            None => (0, None),
        };
        let next = current.saturating_add(delta);
        let expires_at = match ttl {
            Some(_) => expiry_from_ttl(now, ttl),
            None => prev_expiry,
        };
        write_entry(&self.inner, &k, &Value::from(next), expires_at).await?;
        Ok(next)
    }

    async fn set_if_absent(
        &self,
        scope: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let k = Self::key(scope, key);
        let lock = self.lock_for(&k);
        let _guard = lock.lock().await;
        flush_key_locked(&self.inner, &k).await?;

        if load_live_locked(&self.inner, &k).await?.is_some() {
            return Ok(false);
        }
        let expires_at = expiry_from_ttl(now_ms(), ttl);
        write_entry(&self.inner, &k, &value, expires_at).await?;
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        scope: &str,
        key: &str,
        expected: &Value,
        value: Value,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let k = Self::key(scope, key);
        let lock = self.lock_for(&k);
        let _guard = lock.lock().await;
        flush_key_locked(&self.inner, &k).await?;

        match load_live_locked(&self.inner, &k).await? {
            Some((current, _)) if current == *expected => {
                let expires_at = expiry_from_ttl(now_ms(), ttl);
                write_entry(&self.inner, &k, &value, expires_at).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_expired(&self) -> StoreResult<u64> {
        sweep(&self.inner).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StateStoreExt;

    async fn write_through(dir: &Path) -> FileStore {
        FileStore::open(FileStoreConfig {
            base_dir: dir.to_path_buf(),
            flush_interval: None,
            sweep_interval: None,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn roundtrip_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = write_through(dir.path()).await;
            store
                .set("user", "name", Value::from("ada"), None)
                .await
                .unwrap();
        }
        // A fresh handle over the same directory sees the data.
        let store = write_through(dir.path()).await;
        assert_eq!(
            store.get("user", "name").await.unwrap(),
            Some(Value::from("ada"))
        );
    }

    #[tokio::test]
    async fn keys_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_through(dir.path()).await;
        store
            .set("tg:chat/1", "weird key!", Value::from(1), None)
            .await
            .unwrap();
        assert_eq!(
            store.get("tg:chat/1", "weird key!").await.unwrap(),
            Some(Value::from(1))
        );
        assert!(dir.path().join("tg_chat_1").join("weird_key_.json").exists());
    }

    #[tokio::test]
    async fn ttl_expiry_and_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_through(dir.path()).await;
        store
            .set("s", "k", Value::from(1), Some(Duration::from_millis(40)))
            .await
            .unwrap();
        assert_eq!(store.get("s", "k").await.unwrap(), Some(Value::from(1)));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("s", "k").await.unwrap(), None);
        // The expired read already deleted the files.
        assert!(!dir.path().join("s").join("k.json").exists());

        store
            .set("s", "k2", Value::from(2), Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(!dir.path().join("s").join("k2.json").exists());
    }

    #[tokio::test]
    async fn buffered_writes_are_visible_and_flush() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(FileStoreConfig {
            base_dir: dir.path().to_path_buf(),
            flush_interval: Some(Duration::from_secs(3600)),
            sweep_interval: None,
        })
        .await
        .unwrap();

        store.set("s", "k", Value::from(7), None).await.unwrap();
        // Visible through the buffer before anything hits disk.
        assert_eq!(store.get("s", "k").await.unwrap(), Some(Value::from(7)));
        assert!(!dir.path().join("s").join("k.json").exists());

        store.close().await.unwrap();
        assert!(dir.path().join("s").join("k.json").exists());
    }

    #[tokio::test]
    async fn atomic_primitives_see_buffered_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(FileStoreConfig {
            base_dir: dir.path().to_path_buf(),
            flush_interval: Some(Duration::from_secs(3600)),
            sweep_interval: None,
        })
        .await
        .unwrap();

        store.set("s", "n", Value::from(10), None).await.unwrap();
        assert_eq!(store.increment("s", "n", 5, None).await.unwrap(), 15);
        assert!(!store.set_if_absent("s", "n", Value::from(0), None).await.unwrap());
        assert!(
            store
                .compare_and_swap("s", "n", &Value::from(15), Value::from(16), None)
                .await
                .unwrap()
        );
        store.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_serialize_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(write_through(dir.path()).await);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    store.increment("s", "hits", 1, None).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.get("s", "hits").await.unwrap(), Some(Value::from(80)));
    }

    #[tokio::test]
    async fn typed_helpers_roundtrip() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Draft {
            text: String,
        }

        let dir = tempfile::tempdir().unwrap();
        let store = write_through(dir.path()).await;
        let draft = Draft { text: "hi".into() };
        store.set_json("drafts", "1", &draft, None).await.unwrap();
        assert_eq!(
            store.get_json::<Draft>("drafts", "1").await.unwrap(),
            Some(draft)
        );
    }
}
