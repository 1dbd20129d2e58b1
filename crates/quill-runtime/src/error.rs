//! Runtime error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested configuration file does not exist.
    #[error("configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// The configuration could not be parsed or extracted.
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur during runtime operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration loading failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Building the configured store backend failed.
    #[error(transparent)]
    Store(#[from] quill_store::StoreError),

    /// The update source failed to start or stop.
    #[error(transparent)]
    Source(#[from] quill_core::SourceError),

    /// The runtime was wired without a required component.
    #[error("runtime is missing a {0}")]
    MissingComponent(&'static str),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
