//! # Quill Runtime
//!
//! Orchestration layer for Quill: wires an update source to a processing
//! pipeline and manages their shared lifecycle, with layered configuration
//! and `tracing`-based logging on the side.
//!
//! # Example
//!
//! ```rust,ignore
//! use quill_runtime::{ConfigLoader, QuillRuntime, logging};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::new().with_current_dir().load()?;
//!     logging::init_from_config(&config.logging);
//!
//!     let store = quill_runtime::build_store(&config.store).await?;
//!     let runtime = QuillRuntime::builder()
//!         .source(source)
//!         .pipeline(pipeline)
//!         .dispatch(config.dispatch)
//!         .build()?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigLoader, DispatchConfig, OverflowPolicy, Profile, QuillConfig, StoreConfig};
pub use error::{ConfigError, ConfigResult, RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{QuillRuntime, RuntimeBuilder, build_store};
