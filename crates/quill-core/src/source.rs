//! Update source interface.
//!
//! An update source delivers raw [`Update`] values to the runtime — long
//! polling, a webhook receiver, or a test fixture. Sources may deliver
//! updates one at a time or concurrently; the runtime decides queueing and
//! parallelism.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::context::Update;
use crate::error::SourceResult;

/// Callback invoked by a source for each received update.
pub type OnUpdate = Arc<dyn Fn(Update) -> BoxFuture<'static, ()> + Send + Sync>;

/// A source of inbound updates.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Starts delivering updates to `on_update`.
    ///
    /// Must return promptly once delivery is running; delivery stops when
    /// `cancel` fires or [`stop`](Self::stop) is called.
    async fn start(&self, on_update: OnUpdate, cancel: CancellationToken) -> SourceResult<()>;

    /// Stops delivery cleanly.
    async fn stop(&self) -> SourceResult<()>;
}

/// A shareable, type-erased update source.
pub type BoxedSource = Arc<dyn UpdateSource>;
