//! Error types for the state store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Value (de)serialization failed.
    #[error("serialization failed for {scope}/{key}: {source}")]
    Serde {
        /// Scope of the affected entry.
        scope: String,
        /// Key of the affected entry.
        key: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem failure (file backend).
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Database failure (SQLite backend).
    #[error("backend error: {0}")]
    Backend(String),

    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    pub(crate) fn serde(scope: &str, key: &str, source: serde_json::Error) -> Self {
        Self::Serde {
            scope: scope.to_string(),
            key: key.to_string(),
            source,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
