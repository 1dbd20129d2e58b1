//! Unified error types for the Quill core interfaces.
//!
//! Subsystem-specific errors (pipeline, scene, outbox, scheduler) are defined
//! in `quill-framework`; this module only covers the seams that core declares.

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur when talking to a chat platform transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The remote call failed.
    #[error("failed to send: {reason}")]
    SendFailed {
        /// Reason reported by the underlying client.
        reason: String,
    },

    /// The transport does not support the requested operation.
    #[error("operation '{operation}' not supported by transport '{transport}'")]
    NotSupported {
        /// The unsupported operation name.
        operation: &'static str,
        /// The transport that rejected it.
        transport: String,
    },

    /// The operation was cancelled before completion.
    #[error("transport call cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Creates a send failure from any displayable reason.
    pub fn send_failed(reason: impl Into<String>) -> Self {
        Self::SendFailed {
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Update Source Errors
// =============================================================================

/// Errors that can occur while receiving updates from a source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be started.
    #[error("failed to start update source: {0}")]
    StartFailed(String),

    /// The source could not be stopped cleanly.
    #[error("failed to stop update source: {0}")]
    StopFailed(String),

    /// Transport-level failure while polling.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

// =============================================================================
// Handler / Job Errors
// =============================================================================

/// Errors returned by update handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler observed cancellation and unwound.
    #[error("update handling cancelled")]
    Cancelled,

    /// Transport failure while replying.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Any other handler failure.
    #[error("{0}")]
    Other(String),
}

impl HandlerError {
    /// Creates a handler error from any displayable value.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Errors returned by scheduled jobs.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job observed cancellation and unwound.
    #[error("job cancelled")]
    Cancelled,

    /// Any other job failure; caught and logged by the scheduler.
    #[error("{0}")]
    Failed(String),
}

impl JobError {
    /// Creates a job failure from any displayable value.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for update source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type for handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Result type for jobs.
pub type JobResult = Result<(), JobError>;
