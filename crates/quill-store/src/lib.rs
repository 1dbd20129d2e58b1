//! # Quill Store
//!
//! State primitives for the Quill framework: the [`StateStore`] contract
//! with TTL expiry and atomic operations, three backends, and a small
//! fixed-ttl cache.
//!
//! | Backend | Persistence | Atomicity scope |
//! |---|---|---|
//! | [`MemoryStore`] | none | process |
//! | [`FileStore`] | JSON files | process |
//! | [`SqliteStore`] | SQLite | cross-process |
//!
//! # Example
//!
//! ```rust,ignore
//! use quill_store::{MemoryStore, StateStore, StateStoreExt};
//!
//! let store = MemoryStore::new();
//! store.set_json("user", "lang", &"en", None).await?;
//! let n = store.increment("user", "visits", 1, None).await?;
//! ```

pub mod error;
pub mod file;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod ttl_cache;

pub use error::{StoreError, StoreResult};
pub use file::{FileStore, FileStoreConfig};
pub use memory::{MemoryStore, MemoryStoreConfig};
pub use sqlite::{SqliteStore, SqliteStoreConfig};
pub use store::{BoxedStore, StateStore, StateStoreExt};
pub use ttl_cache::TtlCache;
