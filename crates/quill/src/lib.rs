//! # Quill
//!
//! A transport-agnostic update-processing framework for chat platforms.
//!
//! ## Overview
//!
//! Quill keeps the platform-specific pieces behind two narrow seams — an
//! [`UpdateSource`](quill_core::UpdateSource) that produces updates and a
//! [`TransportClient`](quill_core::TransportClient) that sends replies — and
//! provides everything in between.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────┐   ┌──────────┐   ┌──────────────────────────────┐   ┌─────────┐
//! │ Update │──▶│ Dispatch │──▶│ Pipeline: middleware → router │──▶│ Outbox  │
//! │ Source │   │  queue   │   │ (dedup, commands, scenes, …)  │   │ (retry) │
//! └────────┘   └──────────┘   └──────────────────────────────┘   └─────────┘
//!                                     │
//!                              ┌──────┴──────┐
//!                              │ State store │ (memory / file / sqlite)
//!                              └─────────────┘
//! ```
//!
//! - **Runtime**: queueing, concurrency limits, graceful shutdown
//! - **Pipeline**: composable middleware ending in the command router
//! - **Scenes**: multi-step conversations persisted in the state store
//! - **Scheduler**: recurring jobs with store-backed leader election
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use quill::prelude::*;
//!
//! async fn ping(_ctx: UpdateContext) -> HandlerResult {
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let router = Router::builder()
//!         .command(CommandSpec::new("ping"), handler_fn(ping))
//!         .build();
//!     let pipeline = PipelineBuilder::new()
//!         .with(Arc::new(CommandParser::new()))
//!         .build(Arc::new(router));
//!
//!     let runtime = QuillRuntime::builder()
//!         .source(source)
//!         .pipeline(pipeline)
//!         .build()?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `json-log`: JSON log output for the runtime's logging layer

pub use quill_core as core;
pub use quill_framework as framework;
pub use quill_runtime as runtime;
pub use quill_store as store;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use quill::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use quill_runtime::{ConfigLoader, QuillRuntime, build_store};

    // Update model and handler seam
    pub use quill_core::{
        ChatId, HandlerResult, Update, UpdateContext, UserId, handler_fn,
    };

    // External-collaborator traits
    pub use quill_core::{BoxedSource, BoxedTransport, TransportClient, UpdateSource};

    // Pipeline and routing
    pub use quill_framework::{
        CommandParser, CommandSpec, Dedup, Middleware, Next, Pipeline, PipelineBuilder,
        RateLimit, Router, middleware_fn,
    };

    // Conversations and delivery
    pub use quill_framework::{Outbox, Scene, SceneMiddleware, SceneNavigator, Wizard};

    // Recurring work
    pub use quill_framework::{JobSchedule, JobScheduler};
    pub use quill_core::Job;

    // State primitives
    pub use quill_store::{BoxedStore, StateStore, StateStoreExt};
}
