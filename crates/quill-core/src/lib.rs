//! # Quill Core
//!
//! Foundation types and interfaces for the Quill update-processing
//! framework:
//!
//! - The update model and processing context ([`Update`], [`UpdateContext`])
//! - The [`Handler`] trait the router dispatches to
//! - The external-collaborator seams: [`TransportClient`], [`UpdateSource`],
//!   [`Job`]
//!
//! Higher layers live in `quill-store` (state primitives), `quill-framework`
//! (pipeline, router, outbox, scenes, scheduler) and `quill-runtime`
//! (orchestration, config, logging).

pub mod context;
pub mod error;
pub mod handler;
pub mod job;
pub mod source;
pub mod transport;

pub use context::{
    ChatId, Items, ParsedCommand, ServiceMap, ServiceMapBuilder, Update, UpdateContext, UserId,
};
pub use error::{
    HandlerError, HandlerResult, JobError, JobResult, SourceError, SourceResult, TransportError,
    TransportResult,
};
pub use handler::{BoxedHandler, Handler, NoopHandler, handler_fn};
pub use job::{BoxedJob, Job};
pub use source::{BoxedSource, OnUpdate, UpdateSource};
pub use transport::{BoxedTransport, ChatAction, MediaSource, TransportClient};
