//! Recurring job interface.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::JobResult;

/// A unit of recurring work executed by the scheduler.
///
/// Implementations must not block the calling thread and should return
/// promptly when `cancel` fires. Failures are caught and logged by the
/// scheduler; the next tick retries naturally.
#[async_trait]
pub trait Job: Send + Sync {
    /// Stable identifier for this job kind; doubles as the cluster-wide
    /// lock key, so it must be unique across the deployment.
    fn job_type(&self) -> &str;

    /// Runs one tick of the job.
    async fn execute(&self, cancel: CancellationToken) -> JobResult;
}

/// A shareable, type-erased job.
pub type BoxedJob = Arc<dyn Job>;
