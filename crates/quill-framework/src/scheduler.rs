//! Recurring background jobs with store-based leader election.
//!
//! Every registered job gets its own timer task. When the timer fires, the
//! task tries to acquire a lock entry in the `jobs` store scope via
//! `set_if_absent`; exactly one instance sharing the store wins and runs the
//! job, the others skip that occurrence. The lock is never released early:
//! it carries a ttl spanning the gap to the next occurrence and lapses on
//! its own, so a slightly-later instance cannot win the same occurrence and
//! a crashed winner cannot wedge the job forever. A panicking job is
//! contained by running it in its own task.
//!
//! Leadership is per occurrence, not per job lifetime: a job that runs
//! longer than its own period can be started again by another instance once
//! the lock ttl lapses. Jobs are expected to be idempotent.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use quill_core::BoxedJob;
use quill_store::BoxedStore;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::SchedulerError;

/// Store scope holding job leader locks.
pub const JOBS_SCOPE: &str = "jobs";

/// Lock ttl when a schedule has no further occurrence to span to.
const FALLBACK_LOCK_TTL: Duration = Duration::from_secs(60);

/// When a job should run.
#[derive(Clone)]
pub enum JobSchedule {
    /// A fixed delay between occurrences.
    Interval(Duration),
    /// A cron expression (seconds-resolution, UTC).
    Cron(Box<cron::Schedule>),
}

impl JobSchedule {
    /// Fixed-interval schedule.
    pub fn interval(every: Duration) -> Self {
        Self::Interval(every)
    }

    /// Cron schedule, e.g. `"0 0 3 * * *"` for 03:00 UTC daily.
    pub fn cron(expression: &str) -> Result<Self, SchedulerError> {
        cron::Schedule::from_str(expression)
            .map(|schedule| Self::Cron(Box::new(schedule)))
            .map_err(|e| SchedulerError::InvalidCron {
                expression: expression.to_string(),
                reason: e.to_string(),
            })
    }

    /// Delay until the next occurrence. `None` when the schedule has no
    /// future occurrences.
    fn next_delay(&self) -> Option<Duration> {
        match self {
            Self::Interval(every) => Some(*every),
            Self::Cron(schedule) => {
                let next = schedule.upcoming(Utc).next()?;
                (next - Utc::now()).to_std().ok().or(Some(Duration::ZERO))
            }
        }
    }
}

impl std::fmt::Debug for JobSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval(every) => f.debug_tuple("Interval").field(every).finish(),
            Self::Cron(schedule) => f.debug_tuple("Cron").field(&schedule.to_string()).finish(),
        }
    }
}

struct JobEntry {
    job: BoxedJob,
    schedule: JobSchedule,
}

/// Runs registered jobs on their schedules, coordinating instances through
/// the state store.
pub struct JobScheduler {
    store: BoxedStore,
    jobs: Vec<Arc<JobEntry>>,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Creates a scheduler with no jobs registered.
    pub fn new(store: BoxedStore) -> Self {
        Self {
            store,
            jobs: Vec::new(),
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Registers `job` to run on `schedule`. Job types must be unique; the
    /// type is also the leader-lock key.
    pub fn register(
        mut self,
        job: BoxedJob,
        schedule: JobSchedule,
    ) -> Result<Self, SchedulerError> {
        let job_type = job.job_type();
        if self.jobs.iter().any(|e| e.job.job_type() == job_type) {
            return Err(SchedulerError::DuplicateJobType(job_type.to_string()));
        }
        self.jobs.push(Arc::new(JobEntry { job, schedule }));
        Ok(self)
    }

    /// Spawns one timer task per registered job.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        for entry in &self.jobs {
            let entry = Arc::clone(entry);
            let store = Arc::clone(&self.store);
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(run_job_loop(entry, store, cancel)));
        }
    }

    /// Cancels all timer tasks and waits for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(error) = handle.await {
                warn!(%error, "scheduler task did not shut down cleanly");
            }
        }
    }
}

async fn run_job_loop(entry: Arc<JobEntry>, store: BoxedStore, cancel: CancellationToken) {
    let job_type = entry.job.job_type().to_string();
    loop {
        let Some(delay) = entry.schedule.next_delay() else {
            debug!(job = %job_type, "schedule exhausted, stopping");
            break;
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        let lock_ttl = entry.schedule.next_delay().unwrap_or(FALLBACK_LOCK_TTL);
        let acquired = store
            .set_if_absent(JOBS_SCOPE, &job_type, Value::from(1), Some(lock_ttl))
            .await;
        match acquired {
            Ok(true) => run_once(&entry, &job_type, &cancel).await,
            Ok(false) => {
                trace!(job = %job_type, "another instance holds the lock, skipping");
            }
            Err(error) => {
                warn!(job = %job_type, %error, "lock acquisition failed, skipping");
            }
        }
    }
}

/// Runs the job in its own task so a panic cannot take the timer loop down.
async fn run_once(entry: &Arc<JobEntry>, job_type: &str, cancel: &CancellationToken) {
    let job = Arc::clone(&entry.job);
    let job_cancel = cancel.child_token();
    let handle = tokio::spawn(async move { job.execute(job_cancel).await });
    match handle.await {
        Ok(Ok(())) => debug!(job = %job_type, "job completed"),
        Ok(Err(error)) => warn!(job = %job_type, %error, "job failed"),
        Err(error) => warn!(job = %job_type, %error, "job panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quill_core::{Job, JobResult};
    use quill_store::{MemoryStore, MemoryStoreConfig};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingJob {
        runs: Arc<AtomicUsize>,
        in_flight: Arc<AtomicBool>,
        overlapped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn job_type(&self) -> &str {
            "counting"
        }

        async fn execute(&self, _cancel: CancellationToken) -> JobResult {
            if self.in_flight.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.store(false, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn shared_store() -> BoxedStore {
        Arc::new(MemoryStore::with_config(MemoryStoreConfig {
            sweep_interval: None,
        }))
    }

    #[test]
    fn cron_expressions_parse_or_fail() {
        assert!(JobSchedule::cron("0 0 3 * * *").is_ok());
        assert!(matches!(
            JobSchedule::cron("not a cron"),
            Err(SchedulerError::InvalidCron { .. })
        ));
    }

    #[test]
    fn duplicate_job_types_are_rejected() {
        let runs = Arc::new(AtomicUsize::new(0));
        let make_job = || -> BoxedJob {
            Arc::new(CountingJob {
                runs: Arc::clone(&runs),
                in_flight: Arc::new(AtomicBool::new(false)),
                overlapped: Arc::new(AtomicBool::new(false)),
            })
        };
        let result = JobScheduler::new(shared_store())
            .register(make_job(), JobSchedule::interval(Duration::from_secs(1)))
            .and_then(|s| {
                s.register(make_job(), JobSchedule::interval(Duration::from_secs(1)))
            });
        assert!(matches!(result, Err(SchedulerError::DuplicateJobType(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn two_instances_elect_one_leader_per_occurrence() {
        let store = shared_store();
        let runs = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicBool::new(false));
        let overlapped = Arc::new(AtomicBool::new(false));

        let make_scheduler = || {
            let job: BoxedJob = Arc::new(CountingJob {
                runs: Arc::clone(&runs),
                in_flight: Arc::clone(&in_flight),
                overlapped: Arc::clone(&overlapped),
            });
            JobScheduler::new(Arc::clone(&store))
                .register(job, JobSchedule::interval(Duration::from_millis(40)))
                .unwrap()
        };
        let a = make_scheduler();
        let b = make_scheduler();
        a.start();
        b.start();

        tokio::time::sleep(Duration::from_millis(250)).await;
        a.shutdown().await;
        b.shutdown().await;

        let total = runs.load(Ordering::SeqCst);
        // Two instances ticking every 40ms for 250ms: one leader each
        // occurrence means roughly one run per tick, never two.
        assert!(total >= 2, "expected at least 2 runs, got {total}");
        assert!(total <= 8, "expected at most 8 runs, got {total}");
        assert!(!overlapped.load(Ordering::SeqCst), "runs overlapped");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failures_do_not_stop_future_occurrences() {
        struct FailingJob {
            attempts: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl Job for FailingJob {
            fn job_type(&self) -> &str {
                "failing"
            }
            async fn execute(&self, _cancel: CancellationToken) -> JobResult {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                Err(quill_core::JobError::failed("boom"))
            }
        }

        let attempts = Arc::new(AtomicUsize::new(0));
        let scheduler = JobScheduler::new(shared_store())
            .register(
                Arc::new(FailingJob {
                    attempts: Arc::clone(&attempts),
                }),
                JobSchedule::interval(Duration::from_millis(30)),
            )
            .unwrap();
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(130)).await;
        scheduler.shutdown().await;

        assert!(attempts.load(Ordering::SeqCst) >= 2);
    }
}
