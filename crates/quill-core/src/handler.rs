//! Handler trait — the leaf unit the router dispatches to.
//!
//! Handlers are registered as `Arc<dyn Handler>` values; for quick closures
//! use [`handler_fn`]:
//!
//! ```rust,ignore
//! let ping = handler_fn(|ctx: UpdateContext| async move {
//!     tracing::info!(user = %ctx.user(), "ping");
//!     Ok(())
//! });
//! registry.register(CommandSpec::new("ping"), ping);
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::UpdateContext;
use crate::error::HandlerResult;

/// An update handler.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Processes one update.
    async fn handle(&self, ctx: UpdateContext) -> HandlerResult;
}

/// A shareable, type-erased handler.
pub type BoxedHandler = Arc<dyn Handler>;

/// Adapts an async closure into a [`BoxedHandler`].
pub fn handler_fn<F, Fut>(f: F) -> BoxedHandler
where
    F: Fn(UpdateContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(UpdateContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, ctx: UpdateContext) -> HandlerResult {
        (self.0)(ctx).await
    }
}

/// A handler that does nothing; the default pipeline terminal when no router
/// is installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

#[async_trait]
impl Handler for NoopHandler {
    async fn handle(&self, _ctx: UpdateContext) -> HandlerResult {
        Ok(())
    }
}
