//! SQLite store backend.
//!
//! Entries live in a single `state_entries` table keyed by `(scope, key)`,
//! values serialized as JSON text, expiry as an absolute Unix-millis column.
//! The atomic primitives run inside `BEGIN IMMEDIATE` transactions, so they
//! hold across every process sharing the database file. This is the backend
//! to use when scheduler leader locks must exclude other deployments.
//!
//! All database work happens on the connection's worker thread via
//! [`tokio_rusqlite`], keeping the async executor unblocked.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use serde_json::Value;
use tokio_rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::{StateStore, expiry_from_ttl, is_expired, now_ms};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS state_entries (
    scope       TEXT NOT NULL,
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    expires_at  INTEGER,
    PRIMARY KEY (scope, key)
);
CREATE INDEX IF NOT EXISTS idx_state_entries_expiry
    ON state_entries (expires_at) WHERE expires_at IS NOT NULL;
";

/// Configuration for [`SqliteStore`].
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Database file path.
    pub path: PathBuf,
    /// How often the background sweep deletes expired rows.
    /// `None` disables the sweep task.
    pub sweep_interval: Option<Duration>,
}

impl SqliteStoreConfig {
    /// Configuration with the default sweep interval.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sweep_interval: Some(Duration::from_secs(300)),
        }
    }
}

/// SQLite-backed [`StateStore`].
pub struct SqliteStore {
    conn: Connection,
    shutdown: CancellationToken,
}

fn backend(e: tokio_rusqlite::Error<rusqlite::Error>) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn encode(value: &Value) -> Result<String, rusqlite::Error> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn decode(text: &str) -> Result<Value, rusqlite::Error> {
    serde_json::from_str(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

impl SqliteStore {
    /// Opens (and migrates) the database, then spawns the configured sweep
    /// task.
    pub async fn open(config: SqliteStoreConfig) -> StoreResult<Self> {
        let conn = Connection::open(&config.path)
            .await
            .map_err(|e| backend(tokio_rusqlite::Error::Error(e)))?;
        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(backend)?;

        let shutdown = CancellationToken::new();
        if let Some(interval) = config.sweep_interval {
            let conn = conn.clone();
            let token = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            let now = now_ms();
                            let swept = conn
                                .call(move |conn| -> Result<usize, rusqlite::Error> {
                                    Ok(conn.execute(
                                        "DELETE FROM state_entries \
                                         WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                                        params![now],
                                    )?)
                                })
                                .await;
                            match swept {
                                Ok(purged) if purged > 0 => {
                                    debug!(purged, "sqlite store sweep");
                                }
                                Ok(_) => {}
                                Err(error) => warn!(%error, "sqlite store sweep failed"),
                            }
                        }
                    }
                }
            });
        }

        Ok(Self { conn, shutdown })
    }

    /// Stops the sweep task and closes the connection.
    pub async fn close(&self) -> StoreResult<()> {
        self.shutdown.cancel();
        self.conn
            .call(|_conn| -> Result<(), rusqlite::Error> { Ok(()) })
            .await
            .map_err(backend)
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn get(&self, scope: &str, key: &str) -> StoreResult<Option<Value>> {
        let scope = scope.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<Value>, rusqlite::Error> {
                let now = now_ms();
                let row: Option<(String, Option<i64>)> = conn
                    .query_row(
                        "SELECT value, expires_at FROM state_entries \
                         WHERE scope = ?1 AND key = ?2",
                        params![scope, key],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                match row {
                    Some((_, expires_at)) if is_expired(expires_at, now) => {
                        conn.execute(
                            "DELETE FROM state_entries WHERE scope = ?1 AND key = ?2",
                            params![scope, key],
                        )?;
                        Ok(None)
                    }
                    Some((text, _)) => Ok(Some(decode(&text)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(backend)
    }

    async fn set(
        &self,
        scope: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let scope = scope.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let expires_at = expiry_from_ttl(now_ms(), ttl);
                let text = encode(&value)?;
                conn.execute(
                    "INSERT OR REPLACE INTO state_entries (scope, key, value, expires_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![scope, key, text, expires_at],
                )?;
                Ok(())
            })
            .await
            .map_err(backend)
    }

    async fn remove(&self, scope: &str, key: &str) -> StoreResult<bool> {
        let scope = scope.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, rusqlite::Error> {
                let now = now_ms();
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let expires_at: Option<Option<i64>> = tx
                    .query_row(
                        "SELECT expires_at FROM state_entries WHERE scope = ?1 AND key = ?2",
                        params![scope, key],
                        |row| row.get(0),
                    )
                    .optional()?;
                let was_live = matches!(expires_at, Some(at) if !is_expired(at, now));
                tx.execute(
                    "DELETE FROM state_entries WHERE scope = ?1 AND key = ?2",
                    params![scope, key],
                )?;
                tx.commit()?;
                Ok(was_live)
            })
            .await
            .map_err(backend)
    }

    async fn increment(
        &self,
        scope: &str,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> StoreResult<i64> {
        let scope = scope.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<i64, rusqlite::Error> {
                let now = now_ms();
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let row: Option<(String, Option<i64>)> = tx
                    .query_row(
                        "SELECT value, expires_at FROM state_entries \
                         WHERE scope = ?1 AND key = ?2",
                        params![scope, key],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                let (current, prev_expiry) = match row {
                    Some((_, expires_at)) if is_expired(expires_at, now) => (0, None),
                    Some((text, expires_at)) => {
                        (decode(&text)?.as_i64().unwrap_or(0), expires_at)
                    }
                    None => (0, None),
                };
                let next = current.saturating_add(delta);
                let expires_at = match ttl {
                    Some(_) => expiry_from_ttl(now, ttl),
                    None => prev_expiry,
                };
                tx.execute(
                    "INSERT OR REPLACE INTO state_entries (scope, key, value, expires_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![scope, key, next.to_string(), expires_at],
                )?;
                tx.commit()?;
                Ok(next)
            })
            .await
            .map_err(backend)
    }

    async fn set_if_absent(
        &self,
        scope: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let scope = scope.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, rusqlite::Error> {
                let now = now_ms();
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let existing: Option<Option<i64>> = tx
                    .query_row(
                        "SELECT expires_at FROM state_entries WHERE scope = ?1 AND key = ?2",
                        params![scope, key],
                        |row| row.get(0),
                    )
                    .optional()?;
                if matches!(existing, Some(at) if !is_expired(at, now)) {
                    return Ok(false);
                }
                let text = encode(&value)?;
                let expires_at = expiry_from_ttl(now, ttl);
                tx.execute(
                    "INSERT OR REPLACE INTO state_entries (scope, key, value, expires_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![scope, key, text, expires_at],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await
            .map_err(backend)
    }

    async fn compare_and_swap(
        &self,
        scope: &str,
        key: &str,
        expected: &Value,
        value: Value,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let scope = scope.to_string();
        let key = key.to_string();
        let expected = expected.clone();
        self.conn
            .call(move |conn| -> Result<bool, rusqlite::Error> {
                let now = now_ms();
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let row: Option<(String, Option<i64>)> = tx
                    .query_row(
                        "SELECT value, expires_at FROM state_entries \
                         WHERE scope = ?1 AND key = ?2",
                        params![scope, key],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                let matches = match row {
                    Some((_, expires_at)) if is_expired(expires_at, now) => false,
                    Some((text, _)) => decode(&text)? == expected,
                    None => false,
                };
                if !matches {
                    return Ok(false);
                }
                let text = encode(&value)?;
                let expires_at = expiry_from_ttl(now, ttl);
                tx.execute(
                    "INSERT OR REPLACE INTO state_entries (scope, key, value, expires_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![scope, key, text, expires_at],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await
            .map_err(backend)
    }

    async fn purge_expired(&self) -> StoreResult<u64> {
        self.conn
            .call(|conn| -> Result<u64, rusqlite::Error> {
                let now = now_ms();
                let purged = conn.execute(
                    "DELETE FROM state_entries \
                     WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                    params![now],
                )?;
                Ok(purged as u64)
            })
            .await
            .map_err(backend)
    }
}
