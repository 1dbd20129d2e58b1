//! Runtime orchestration.
//!
//! [`QuillRuntime`] wires an [`UpdateSource`] to a [`Pipeline`] through a
//! dispatch queue. The source pushes updates into the queue; a dispatch loop
//! pulls them out and processes each in its own task, bounded by a
//! concurrency semaphore. Queue behavior under load is configured with
//! [`DispatchConfig`]: a bounded queue either backpressures the source or
//! drops the newest update.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use quill_runtime::QuillRuntime;
//!
//! let runtime = QuillRuntime::builder()
//!     .source(source)
//!     .pipeline(pipeline)
//!     .build()?;
//!
//! runtime.run().await?; // until Ctrl+C / SIGTERM
//! ```

use std::sync::Arc;

use quill_core::{BoxedSource, OnUpdate, Update};
use quill_framework::{JobScheduler, Pipeline, PipelineError};
use quill_store::{
    BoxedStore, FileStore, FileStoreConfig, MemoryStore, MemoryStoreConfig, SqliteStore,
    SqliteStoreConfig, StoreResult,
};
use tokio::signal;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::schema::sweep_interval;
use crate::config::{DispatchConfig, OverflowPolicy, StoreConfig};
use crate::error::{RuntimeError, RuntimeResult};

/// Builds the configured [`StateStore`](quill_store::StateStore) backend.
pub async fn build_store(config: &StoreConfig) -> StoreResult<BoxedStore> {
    match config {
        StoreConfig::Memory {
            sweep_interval_secs,
        } => Ok(Arc::new(MemoryStore::with_config(MemoryStoreConfig {
            sweep_interval: sweep_interval(*sweep_interval_secs),
        }))),
        StoreConfig::File {
            path,
            flush_interval_ms,
            sweep_interval_secs,
        } => {
            let store = FileStore::open(FileStoreConfig {
                base_dir: path.clone(),
                flush_interval: (*flush_interval_ms > 0)
                    .then(|| std::time::Duration::from_millis(*flush_interval_ms)),
                sweep_interval: sweep_interval(*sweep_interval_secs),
            })
            .await?;
            Ok(Arc::new(store))
        }
        StoreConfig::Sqlite {
            path,
            sweep_interval_secs,
        } => {
            let store = SqliteStore::open(SqliteStoreConfig {
                path: path.clone(),
                sweep_interval: sweep_interval(*sweep_interval_secs),
            })
            .await?;
            Ok(Arc::new(store))
        }
    }
}

enum QueueSender {
    Bounded(mpsc::Sender<Update>),
    Unbounded(mpsc::UnboundedSender<Update>),
}

enum QueueReceiver {
    Bounded(mpsc::Receiver<Update>),
    Unbounded(mpsc::UnboundedReceiver<Update>),
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<Update> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }
}

/// Orchestrates one update source and one processing pipeline.
pub struct QuillRuntime {
    source: BoxedSource,
    pipeline: Pipeline,
    dispatch: DispatchConfig,
    scheduler: Option<Arc<JobScheduler>>,
    cancel: CancellationToken,
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
}

impl QuillRuntime {
    /// Starts a [`RuntimeBuilder`].
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Token cancelled on shutdown; clone it into custom tasks that should
    /// stop with the runtime.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Starts the dispatch loop and the update source.
    pub async fn start(&self) -> RuntimeResult<()> {
        let (sender, receiver) = match self.dispatch.queue_capacity {
            0 => {
                let (tx, rx) = mpsc::unbounded_channel();
                (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
            }
            capacity => {
                let (tx, rx) = mpsc::channel(capacity);
                (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
            }
        };

        let overflow = self.dispatch.overflow;
        let sender = Arc::new(sender);
        let on_update: OnUpdate = Arc::new(move |update| {
            let sender = Arc::clone(&sender);
            Box::pin(async move {
                match sender.as_ref() {
                    QueueSender::Unbounded(tx) => {
                        let _ = tx.send(update);
                    }
                    QueueSender::Bounded(tx) => match overflow {
                        OverflowPolicy::Wait => {
                            let _ = tx.send(update).await;
                        }
                        OverflowPolicy::Drop => {
                            if let Err(mpsc::error::TrySendError::Full(update)) =
                                tx.try_send(update)
                            {
                                warn!(
                                    update_id = %update.update_id,
                                    "dispatch queue full, update dropped"
                                );
                            }
                        }
                    },
                }
            })
        });

        let handle = self.spawn_dispatch_loop(receiver);
        *self.dispatch_handle.lock().await = Some(handle);

        self.source
            .start(on_update, self.cancel.child_token())
            .await?;
        if let Some(scheduler) = &self.scheduler {
            scheduler.start();
        }
        info!("runtime started");
        Ok(())
    }

    fn spawn_dispatch_loop(&self, mut receiver: QueueReceiver) -> JoinHandle<()> {
        let pipeline = self.pipeline.clone();
        let cancel = self.cancel.clone();
        let semaphore = Arc::new(Semaphore::new(self.dispatch.max_concurrency.max(1)));

        tokio::spawn(async move {
            loop {
                let update = tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe = receiver.recv() => match maybe {
                        Some(update) => update,
                        None => break,
                    },
                };

                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let pipeline = pipeline.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    match pipeline.process(update, &cancel).await {
                        Ok(()) => {}
                        Err(PipelineError::Cancelled) => {
                            debug!("update processing cancelled");
                        }
                        Err(error) => {
                            warn!(%error, "update processing failed");
                        }
                    }
                    drop(permit);
                });
            }
            debug!("dispatch loop stopped");
        })
    }

    /// Stops the source and the dispatch loop.
    pub async fn stop(&self) -> RuntimeResult<()> {
        info!("stopping runtime");
        self.cancel.cancel();
        self.source.stop().await?;
        if let Some(scheduler) = &self.scheduler {
            scheduler.shutdown().await;
        }

        if let Some(handle) = self.dispatch_handle.lock().await.take()
            && let Err(error) = handle.await
        {
            warn!(%error, "dispatch loop did not shut down cleanly");
        }
        info!("runtime stopped");
        Ok(())
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        Self::wait_for_shutdown().await;
        self.stop().await
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await
    }

    /// Waits for shutdown signals (Ctrl+C or SIGTERM).
    async fn wait_for_shutdown() {
        #[cfg(unix)]
        {
            let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(error) => {
                    warn!(%error, "failed to register SIGTERM handler, using Ctrl+C only");
                    let _ = signal::ctrl_c().await;
                    info!("received Ctrl+C, shutting down");
                    return;
                }
            };

            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("received Ctrl+C, shutting down");
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = signal::ctrl_c().await;
            info!("received Ctrl+C, shutting down");
        }
    }
}

/// Builder for [`QuillRuntime`].
#[derive(Default)]
pub struct RuntimeBuilder {
    source: Option<BoxedSource>,
    pipeline: Option<Pipeline>,
    dispatch: DispatchConfig,
    scheduler: Option<Arc<JobScheduler>>,
}

impl RuntimeBuilder {
    /// Sets the update source.
    pub fn source(mut self, source: BoxedSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the processing pipeline.
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Sets queue and concurrency limits.
    pub fn dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Attaches a job scheduler started and stopped with the runtime.
    pub fn scheduler(mut self, scheduler: Arc<JobScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Finalizes the runtime.
    pub fn build(self) -> RuntimeResult<QuillRuntime> {
        Ok(QuillRuntime {
            source: self
                .source
                .ok_or(RuntimeError::MissingComponent("source"))?,
            pipeline: self
                .pipeline
                .ok_or(RuntimeError::MissingComponent("pipeline"))?,
            dispatch: self.dispatch,
            scheduler: self.scheduler,
            cancel: CancellationToken::new(),
            dispatch_handle: Mutex::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quill_core::{ChatId, SourceResult, UpdateSource, UserId, handler_fn};
    use quill_framework::{CommandParser, CommandSpec, PipelineBuilder, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct VecSource {
        updates: Vec<Update>,
    }

    #[async_trait]
    impl UpdateSource for VecSource {
        async fn start(&self, on_update: OnUpdate, _cancel: CancellationToken) -> SourceResult<()> {
            for update in &self.updates {
                on_update(update.clone()).await;
            }
            Ok(())
        }

        async fn stop(&self) -> SourceResult<()> {
            Ok(())
        }
    }

    fn text_update(id: usize, text: &str) -> Update {
        Update::new(
            "test",
            id.to_string(),
            ChatId::from("c1"),
            UserId::from("u1"),
            Some(text.to_string()),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn updates_flow_from_source_to_handler() {
        let pongs = Arc::new(AtomicUsize::new(0));
        let ping = {
            let pongs = Arc::clone(&pongs);
            handler_fn(move |_ctx| {
                let pongs = Arc::clone(&pongs);
                async move {
                    pongs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };
        let router = Router::builder()
            .command(CommandSpec::new("ping"), ping)
            .build();
        let pipeline = PipelineBuilder::new()
            .with(Arc::new(CommandParser::new()))
            .build(Arc::new(router));

        let source = Arc::new(VecSource {
            updates: vec![
                text_update(1, "/ping"),
                text_update(2, "not a command"),
                text_update(3, "/ping"),
            ],
        });
        let runtime = QuillRuntime::builder()
            .source(source)
            .pipeline(pipeline)
            .build()
            .unwrap();

        runtime
            .run_until(tokio::time::sleep(Duration::from_millis(200)))
            .await
            .unwrap();

        assert_eq!(pongs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ping_replies_carry_a_per_user_counter() {
        let store: quill_store::BoxedStore =
            Arc::new(quill_store::MemoryStore::with_config(
                quill_store::MemoryStoreConfig {
                    sweep_interval: None,
                },
            ));
        let replies = Arc::new(std::sync::Mutex::new(Vec::new()));
        let ping = {
            let store = Arc::clone(&store);
            let replies = Arc::clone(&replies);
            handler_fn(move |ctx| {
                let store = Arc::clone(&store);
                let replies = Arc::clone(&replies);
                async move {
                    let key = format!("ping:{}", ctx.user());
                    let n = store
                        .increment("user", &key, 1, Some(Duration::from_secs(30 * 86_400)))
                        .await
                        .unwrap();
                    replies.lock().unwrap().push(format!("pong #{n}"));
                    Ok(())
                }
            })
        };
        let router = Router::builder()
            .command(CommandSpec::new("ping"), ping)
            .build();
        let pipeline = PipelineBuilder::new()
            .with(Arc::new(CommandParser::new()))
            .build(Arc::new(router));

        let runtime = QuillRuntime::builder()
            .source(Arc::new(VecSource {
                updates: vec![text_update(1, "/ping"), text_update(2, "/ping")],
            }))
            .pipeline(pipeline)
            .dispatch(DispatchConfig {
                max_concurrency: 1,
                ..DispatchConfig::default()
            })
            .build()
            .unwrap();
        runtime
            .run_until(tokio::time::sleep(Duration::from_millis(200)))
            .await
            .unwrap();

        let replies = replies.lock().unwrap();
        assert_eq!(replies.as_slice(), ["pong #1", "pong #2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drop_policy_sheds_load() {
        let processed = Arc::new(AtomicUsize::new(0));
        let slow = {
            let processed = Arc::clone(&processed);
            handler_fn(move |_ctx| {
                let processed = Arc::clone(&processed);
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    processed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };
        let pipeline = PipelineBuilder::new().build(slow);

        let updates: Vec<Update> = (0..50).map(|i| text_update(i, "x")).collect();
        let emitted = updates.len();
        let runtime = QuillRuntime::builder()
            .source(Arc::new(VecSource { updates }))
            .pipeline(pipeline)
            .dispatch(DispatchConfig {
                queue_capacity: 2,
                overflow: OverflowPolicy::Drop,
                max_concurrency: 1,
            })
            .build()
            .unwrap();

        runtime
            .run_until(tokio::time::sleep(Duration::from_millis(200)))
            .await
            .unwrap();

        let done = processed.load(Ordering::SeqCst);
        assert!(done > 0, "nothing was processed");
        assert!(done < emitted, "expected shedding, all {emitted} processed");
    }

    #[tokio::test]
    async fn build_requires_source_and_pipeline() {
        let result = QuillRuntime::builder().build();
        assert!(matches!(
            result,
            Err(RuntimeError::MissingComponent("source"))
        ));
    }

    #[tokio::test]
    async fn store_config_selects_backend() {
        let dir = tempfile::tempdir().unwrap();
        let store = build_store(&StoreConfig::Sqlite {
            path: dir.path().join("state.db"),
            sweep_interval_secs: 0,
        })
        .await
        .unwrap();
        store
            .set("s", "k", serde_json::Value::from(1), None)
            .await
            .unwrap();
        assert_eq!(
            store.get("s", "k").await.unwrap(),
            Some(serde_json::Value::from(1))
        );
    }
}
