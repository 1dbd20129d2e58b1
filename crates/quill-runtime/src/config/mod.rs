//! Configuration module for the Quill runtime.
//!
//! TOML-based configuration with environment overrides, covering logging,
//! the store backend, dispatch limits and outbox retry policy.

pub mod loader;
pub mod schema;

pub use loader::{ConfigLoader, Profile};
pub use schema::{
    DispatchConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, OutboxSettings,
    OverflowPolicy, QuillConfig, SpanEventConfig, StoreConfig,
};
