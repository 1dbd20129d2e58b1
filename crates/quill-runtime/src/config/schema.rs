//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuillConfig {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// State store backend selection.
    #[serde(default)]
    pub store: StoreConfig,

    /// Update queue and concurrency settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Outbound delivery settings.
    #[serde(default)]
    pub outbox: OutboxSettings,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level (default).
    #[default]
    Info,
    /// Warn level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Converts to a `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }

    /// Lowercase name, as used in filter directives.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line compact output (default).
    #[default]
    Compact,
    /// Default `tracing` formatting.
    Full,
    /// Multi-line human-oriented output.
    Pretty,
    /// JSON lines (requires the `json-log` feature).
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Standard output (default).
    #[default]
    Stdout,
    /// Standard error.
    Stderr,
    /// A log file (see `file_path`).
    File,
}

/// Span lifecycle events to emit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct SpanEventConfig {
    /// Log span creation.
    #[serde(default)]
    pub new: bool,
    /// Log span entry.
    #[serde(default)]
    pub enter: bool,
    /// Log span exit.
    #[serde(default)]
    pub exit: bool,
    /// Log span close.
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Output destination.
    #[serde(default)]
    pub output: LogOutput,

    /// Per-module level overrides, e.g. `quill_framework = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,

    /// Span lifecycle events to emit.
    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread ids in output.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line in output.
    #[serde(default)]
    pub file_location: bool,

    /// Log file path when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            filters: HashMap::new(),
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            file_path: None,
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// State store backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In-process memory store.
    Memory {
        /// Sweep interval in seconds; `0` disables the sweep.
        #[serde(default = "default_sweep_secs")]
        sweep_interval_secs: u64,
    },

    /// JSON files under a base directory.
    File {
        /// Base directory for scope folders.
        path: PathBuf,
        /// Write-buffer flush interval in millis; `0` writes through.
        #[serde(default)]
        flush_interval_ms: u64,
        /// Sweep interval in seconds; `0` disables the sweep.
        #[serde(default = "default_sweep_secs")]
        sweep_interval_secs: u64,
    },

    /// SQLite database file.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Sweep interval in seconds; `0` disables the sweep.
        #[serde(default = "default_sweep_secs")]
        sweep_interval_secs: u64,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory {
            sweep_interval_secs: default_sweep_secs(),
        }
    }
}

fn default_sweep_secs() -> u64 {
    60
}

pub(crate) fn sweep_interval(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

// =============================================================================
// Dispatch
// =============================================================================

/// What to do with a new update when the bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Apply backpressure to the source until space frees up (default).
    #[default]
    Wait,
    /// Drop the newest update.
    Drop,
}

/// Update queue and concurrency settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Queue capacity; `0` means unbounded.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Behavior when the bounded queue is full.
    #[serde(default)]
    pub overflow: OverflowPolicy,

    /// Maximum updates processed concurrently.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            overflow: OverflowPolicy::default(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_concurrency() -> usize {
    64
}

// =============================================================================
// Outbox
// =============================================================================

/// Outbound delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxSettings {
    /// Total attempts per message, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt in millis; doubles each retry.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl OutboxSettings {
    /// Converts to the framework's outbox configuration.
    pub fn to_outbox_config(&self) -> quill_framework::OutboxConfig {
        quill_framework::OutboxConfig {
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    500
}
