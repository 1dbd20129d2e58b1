//! # Quill Framework
//!
//! The processing layer of Quill: updates enter through the middleware
//! [`Pipeline`], get routed by the [`Router`], and reply through the
//! [`Outbox`]. Long conversations live in [`scene`]s, recurring work in the
//! [`JobScheduler`].
//!
//! # Example
//!
//! ```rust,ignore
//! use quill_framework::prelude::*;
//!
//! let router = Router::builder()
//!     .command(CommandSpec::new("ping"), ping_handler)
//!     .build();
//!
//! let pipeline = PipelineBuilder::new()
//!     .with(Arc::new(Dedup::new()))
//!     .with(Arc::new(CommandParser::new()))
//!     .services(services)
//!     .build(Arc::new(router));
//! ```

pub mod error;
pub mod middleware;
pub mod outbox;
pub mod pipeline;
pub mod router;
pub mod scene;
pub mod scheduler;
pub mod stats;
pub mod wizard;

pub use error::{
    BindError, OutboxError, PipelineError, PipelineResult, SceneError, SceneResult, SchedulerError,
};
pub use middleware::{CommandParser, Dedup, RateLimit};
pub use outbox::{DeadLetter, Outbox, OutboxConfig};
pub use pipeline::{
    BoxedMiddleware, Middleware, Next, Pipeline, PipelineBuilder, middleware_fn,
};
pub use router::{BindArgs, CommandArgsExt, CommandSpec, Router, RouterBuilder};
pub use scene::{
    BoxedScene, SCENE_SCOPE, Scene, SceneMiddleware, SceneNavigator, SceneState,
};
pub use scheduler::{JOBS_SCOPE, JobSchedule, JobScheduler};
pub use stats::StatsCollector;
pub use wizard::{Wizard, WizardBuilder, WizardStep};
