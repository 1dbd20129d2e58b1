//! The middleware pipeline.
//!
//! Every update flows through an ordered chain of [`Middleware`]s ending in
//! a terminal [`Handler`] (usually the router). Each middleware receives the
//! context plus a [`Next`] continuation and decides whether to call it:
//! skipping the call short-circuits the rest of the chain, which is how
//! dedup and rate limiting drop updates.
//!
//! The chain is fixed at build time: [`PipelineBuilder::build`] consumes the
//! builder, so a running pipeline can never be mutated.
//!
//! # Example
//!
//! ```rust,ignore
//! use quill_framework::{PipelineBuilder, middleware::CommandParser};
//!
//! let pipeline = PipelineBuilder::new()
//!     .with(Arc::new(CommandParser::default()))
//!     .services(services)
//!     .build(router);
//! pipeline.process(update, &cancel).await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use quill_core::{BoxedHandler, ServiceMap, Update, UpdateContext};
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, span};

use crate::error::{PipelineError, PipelineResult};

/// The continuation handed to each middleware.
///
/// Calling [`run`](Next::run) passes the (possibly replaced) context to the
/// rest of the chain. Dropping it without calling short-circuits.
#[derive(Clone)]
pub struct Next {
    inner: Arc<dyn Fn(UpdateContext) -> BoxFuture<'static, PipelineResult> + Send + Sync>,
}

impl Next {
    /// Invokes the remainder of the chain with `ctx`.
    pub async fn run(&self, ctx: UpdateContext) -> PipelineResult {
        (self.inner)(ctx).await
    }

    fn terminal(handler: BoxedHandler) -> Self {
        Self {
            inner: Arc::new(move |ctx| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    if ctx.is_cancelled() {
                        return Err(PipelineError::Cancelled);
                    }
                    handler.handle(ctx).await.map_err(PipelineError::from)
                })
            }),
        }
    }

    fn wrap(middleware: BoxedMiddleware, next: Next) -> Self {
        Self {
            inner: Arc::new(move |ctx| {
                let middleware = Arc::clone(&middleware);
                let next = next.clone();
                Box::pin(async move {
                    if ctx.is_cancelled() {
                        return Err(PipelineError::Cancelled);
                    }
                    middleware.handle(ctx, next).await
                })
            }),
        }
    }
}

/// A processing stage in the pipeline.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Processes `ctx`, calling `next` to continue the chain.
    async fn handle(&self, ctx: UpdateContext, next: Next) -> PipelineResult;
}

/// A shareable, type-erased middleware.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Wraps an async closure as a [`Middleware`].
pub fn middleware_fn<F, Fut>(f: F) -> BoxedMiddleware
where
    F: Fn(UpdateContext, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PipelineResult> + Send + 'static,
{
    struct FnMiddleware<F>(F);

    #[async_trait]
    impl<F, Fut> Middleware for FnMiddleware<F>
    where
        F: Fn(UpdateContext, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PipelineResult> + Send + 'static,
    {
        async fn handle(&self, ctx: UpdateContext, next: Next) -> PipelineResult {
            (self.0)(ctx, next).await
        }
    }

    Arc::new(FnMiddleware(f))
}

/// Builder for [`Pipeline`]. Middlewares run in registration order.
#[derive(Default)]
pub struct PipelineBuilder {
    middlewares: Vec<BoxedMiddleware>,
    services: ServiceMap,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware to the chain.
    pub fn with(mut self, middleware: BoxedMiddleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Sets the service map contexts are created with.
    pub fn services(mut self, services: ServiceMap) -> Self {
        self.services = services;
        self
    }

    /// Finalizes the chain around `terminal`. Consumes the builder; the
    /// resulting pipeline is immutable.
    pub fn build(self, terminal: BoxedHandler) -> Pipeline {
        let mut next = Next::terminal(terminal);
        for middleware in self.middlewares.into_iter().rev() {
            next = Next::wrap(middleware, next);
        }
        Pipeline {
            entry: next,
            services: self.services,
        }
    }
}

/// An immutable middleware chain ending in a terminal handler.
#[derive(Clone)]
pub struct Pipeline {
    entry: Next,
    services: ServiceMap,
}

impl Pipeline {
    /// Runs `update` through the chain with a fresh context.
    ///
    /// The context gets a child of `cancel`, so cancelling the parent stops
    /// this traversal without affecting others.
    pub async fn process(&self, update: Update, cancel: &CancellationToken) -> PipelineResult {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let span = span!(
            Level::DEBUG,
            "pipeline",
            transport = %update.transport,
            update_id = %update.update_id,
        );
        let _enter = span.enter();
        debug!("processing update");

        let ctx = UpdateContext::new(update, self.services.clone(), cancel.child_token());
        self.entry.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::{ChatId, UserId, handler_fn};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn update(text: &str) -> Update {
        Update::new(
            "test",
            "1",
            ChatId::from("c1"),
            UserId::from("u1"),
            Some(text.to_string()),
        )
    }

    #[tokio::test]
    async fn middlewares_run_in_registration_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let first = {
            let order = Arc::clone(&order);
            middleware_fn(move |ctx, next| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().push("first");
                    next.run(ctx).await
                }
            })
        };
        let second = {
            let order = Arc::clone(&order);
            middleware_fn(move |ctx, next| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().push("second");
                    next.run(ctx).await
                }
            })
        };
        let terminal = {
            let order = Arc::clone(&order);
            handler_fn(move |_ctx| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().push("terminal");
                    Ok(())
                }
            })
        };

        let pipeline = PipelineBuilder::new().with(first).with(second).build(terminal);
        pipeline
            .process(update("hi"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*order.lock(), vec!["first", "second", "terminal"]);
    }

    #[tokio::test]
    async fn skipping_next_short_circuits() {
        let reached = Arc::new(AtomicUsize::new(0));
        let drop_all = middleware_fn(|_ctx, _next| async { Ok(()) });
        let terminal = {
            let reached = Arc::clone(&reached);
            handler_fn(move |_ctx| {
                let reached = Arc::clone(&reached);
                async move {
                    reached.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };

        let pipeline = PipelineBuilder::new().with(drop_all).build(terminal);
        pipeline
            .process(update("hi"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reached.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelled_token_stops_processing() {
        let reached = Arc::new(AtomicUsize::new(0));
        let terminal = {
            let reached = Arc::clone(&reached);
            handler_fn(move |_ctx| {
                let reached = Arc::clone(&reached);
                async move {
                    reached.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };

        let pipeline = PipelineBuilder::new().build(terminal);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline.process(update("hi"), &cancel).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(reached.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn replaced_context_flows_downstream() {
        let enrich = middleware_fn(|ctx, next| async move {
            let ctx = ctx.with_payload(serde_json::json!({"tag": "enriched"}));
            next.run(ctx).await
        });
        let saw_payload = Arc::new(AtomicUsize::new(0));
        let terminal = {
            let saw_payload = Arc::clone(&saw_payload);
            handler_fn(move |ctx: UpdateContext| {
                let saw_payload = Arc::clone(&saw_payload);
                async move {
                    if ctx.payload().is_some() {
                        saw_payload.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(())
                }
            })
        };

        let pipeline = PipelineBuilder::new().with(enrich).build(terminal);
        pipeline
            .process(update("hi"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(saw_payload.load(Ordering::SeqCst), 1);
    }
}
