//! Error types for the framework layer.

use quill_core::{HandlerError, TransportError};
use quill_store::StoreError;
use thiserror::Error;

/// Errors that can occur while an update travels through the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Processing was cancelled by the runtime.
    #[error("pipeline cancelled")]
    Cancelled,

    /// The terminal handler (or a middleware delegating to one) failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// A middleware failed for its own reasons.
    #[error("{0}")]
    Middleware(String),
}

impl PipelineError {
    /// Shorthand for a middleware failure.
    pub fn middleware(msg: impl Into<String>) -> Self {
        Self::Middleware(msg.into())
    }
}

/// Result type for pipeline traversal.
pub type PipelineResult = Result<(), PipelineError>;

/// Errors from binding command arguments to typed values.
#[derive(Debug, Error)]
pub enum BindError {
    /// Too few or too many arguments for the target type.
    #[error("expected {expected} arguments, got {got}")]
    Arity {
        /// Arity of the target type.
        expected: usize,
        /// Arguments actually supplied.
        got: usize,
    },

    /// An argument failed to parse into its field type.
    #[error("argument {index} ({value:?}): {reason}")]
    Parse {
        /// Zero-based argument position.
        index: usize,
        /// The raw argument text.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// Post-parse validation rejected the bound value.
    #[error("validation failed: {0}")]
    Validation(String),
}

/// Errors from outbox delivery.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// All attempts failed; the message was moved to the dead-letter set.
    #[error("message {id} dead-lettered after {attempts} attempts")]
    DeadLettered {
        /// Outbox message id.
        id: String,
        /// Attempts made.
        attempts: u32,
    },

    /// Delivery was cancelled; the message stays pending.
    #[error("delivery of message {id} cancelled")]
    Cancelled {
        /// Outbox message id.
        id: String,
    },

    /// No dead-lettered message with the given id.
    #[error("no dead-lettered message {0}")]
    UnknownDeadLetter(String),
}

/// Errors from scene navigation.
#[derive(Debug, Error)]
pub enum SceneError {
    /// The user has no active scene.
    #[error("no active scene for {session}")]
    NoActiveScene {
        /// Session key the lookup used.
        session: String,
    },

    /// No scene registered under the given name.
    #[error("unknown scene {name:?}")]
    UnknownScene {
        /// The requested scene name.
        name: String,
    },

    /// Optimistic concurrency lost too many times in a row.
    #[error("scene state contention for {session} after {retries} retries")]
    Contention {
        /// Session key under contention.
        session: String,
        /// Retries performed.
        retries: u32,
    },

    /// A transition tried to move to an earlier step.
    #[error("step {requested} is behind current step {current}")]
    StepBackwards {
        /// Step the caller asked for.
        requested: u32,
        /// Step currently recorded.
        current: u32,
    },

    /// The navigation was cancelled.
    #[error("scene navigation cancelled")]
    Cancelled,

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A scene callback failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// Talking to the transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result type for scene navigation.
pub type SceneResult<T> = Result<T, SceneError>;

/// Errors from the job scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A cron expression failed to parse.
    #[error("invalid cron expression {expression:?}: {reason}")]
    InvalidCron {
        /// The offending expression.
        expression: String,
        /// Parser message.
        reason: String,
    },

    /// Two descriptors share a job type.
    #[error("duplicate job type {0:?}")]
    DuplicateJobType(String),

    /// Underlying store failure while managing leader locks.
    #[error(transparent)]
    Store(#[from] StoreError),
}
