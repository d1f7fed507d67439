//! At-least-once runner for side effects with exponential backoff.
//!
//! A single worker task owns scheduling: it scans the job map for due jobs,
//! runs their executors concurrently, then settles each outcome. The map is
//! guarded by a mutex so `enqueue` and status reads from other tasks never
//! race the worker's bookkeeping. The worker exits once the map is empty and
//! the next `enqueue` starts a fresh one.

mod executor;
mod job;

pub use executor::{ExecutorRegistry, JobExecutor};
pub use job::{
    AttemptOutcome, AttemptRecord, JobId, JobSnapshot, JobType, MAX_ATTEMPTS_LIMIT, MAX_DELAY_MS,
    QueueStatus, RetryConfig, RetryJob,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::error::{FailureKind, QueueError, StoreError};
use crate::ports::AttemptLog;
use crate::state_machine::ApplicationId;

/// Worker timing and the retry policy applied when a caller gives none.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub poll_interval: Duration,
    pub executor_timeout: Duration,
    pub default_retry: RetryConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1_000),
            executor_timeout: Duration::from_millis(10_000),
            default_retry: RetryConfig::default(),
        }
    }
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobId, RetryJob>,
    /// Jobs dropped after their last attempt, kept for operator retries.
    parked: HashMap<JobId, RetryJob>,
    worker_running: bool,
}

pub struct RetryQueue {
    state: Mutex<QueueState>,
    executors: ExecutorRegistry,
    attempts: Arc<dyn AttemptLog>,
    config: QueueConfig,
    wake: Notify,
    idle: Notify,
}

impl RetryQueue {
    pub fn new(
        executors: ExecutorRegistry,
        attempts: Arc<dyn AttemptLog>,
        config: QueueConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            executors,
            attempts,
            config,
            wake: Notify::new(),
            idle: Notify::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Bookkeeping never panics mid-update, so a poisoned map is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `job` with `attempt = 0`, first run one backoff base from now.
    ///
    /// Starts the worker if it is idle.
    pub fn enqueue(self: &Arc<Self>, mut job: RetryJob) -> JobId {
        job.attempt = 0;
        job.in_flight = false;
        job.last_error = None;
        job.schedule_in(job.retry.backoff_base_ms);
        let id = job.id;

        info!(
            job_id = %id,
            application_id = %job.application_id,
            job_type = %job.job_type,
            max_attempts = job.retry.max_attempts,
            "job enqueued"
        );

        let start_worker = {
            let mut state = self.lock();
            state.jobs.insert(id, job);
            !std::mem::replace(&mut state.worker_running, true)
        };

        if start_worker {
            tokio::spawn(Arc::clone(self).run());
        } else {
            self.wake.notify_one();
        }
        id
    }

    /// Build and enqueue a job, falling back to the queue's default retry policy.
    pub fn enqueue_job(
        self: &Arc<Self>,
        job_type: JobType,
        application_id: ApplicationId,
        payload: serde_json::Value,
        options: Option<RetryConfig>,
    ) -> JobId {
        let retry = options.unwrap_or(self.config.default_retry);
        self.enqueue(RetryJob::new(application_id, job_type, payload, retry))
    }

    /// Pending jobs, soonest first. No side effects.
    pub fn status(&self) -> QueueStatus {
        let state = self.lock();
        let mut jobs: Vec<JobSnapshot> = state.jobs.values().map(RetryJob::snapshot).collect();
        jobs.sort_by_key(|job| job.scheduled_at);
        QueueStatus {
            total_jobs: jobs.len(),
            jobs,
        }
    }

    /// Jobs dropped after exhausting their attempts and not yet retried by hand.
    pub fn parked(&self) -> Vec<JobSnapshot> {
        let state = self.lock();
        let mut jobs: Vec<JobSnapshot> = state.parked.values().map(RetryJob::snapshot).collect();
        jobs.sort_by_key(|job| job.scheduled_at);
        jobs
    }

    pub async fn attempts(&self, id: &ApplicationId) -> Result<Vec<AttemptRecord>, StoreError> {
        self.attempts.for_application(id).await
    }

    /// Resolve once the worker has drained every job.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.lock().worker_running {
                return;
            }
            notified.await;
        }
    }

    /// Operator-triggered single attempt, bypassing the schedule.
    ///
    /// Picks the oldest active job for the pair, else the oldest parked one.
    /// An active job the worker is currently running is refused. Never
    /// changes `attempt` or the next scheduled run. A success removes the job.
    pub async fn retry_now(
        &self,
        application_id: &ApplicationId,
        job_type: JobType,
    ) -> Result<(), QueueError> {
        let matches = |job: &RetryJob| job.application_id == *application_id && job.job_type == job_type;
        let (job, was_parked) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let active = state
                .jobs
                .values_mut()
                .filter(|job| matches(&**job))
                .min_by_key(|job| job.created_at);
            if let Some(job) = active {
                if job.in_flight {
                    return Err(QueueError::InFlight { job_id: job.id });
                }
                // Keeps the worker off it until the manual run settles.
                job.in_flight = true;
                (job.clone(), false)
            } else {
                let parked = state
                    .parked
                    .values()
                    .filter(|job| matches(&**job))
                    .min_by_key(|job| job.created_at)
                    .map(|job| job.id);
                match parked.and_then(|id| state.parked.remove(&id)) {
                    Some(job) => (job, true),
                    None => {
                        return Err(QueueError::NoJob {
                            application_id: application_id.clone(),
                            job_type,
                        });
                    }
                }
            }
        };

        info!(job_id = %job.id, %application_id, %job_type, "manual retry");
        let result = self.executors.run(&job, self.config.executor_timeout).await;

        let mut record = AttemptRecord::for_job(&job, AttemptOutcome::Success);
        record.manual = true;
        let outcome = match result {
            Ok(()) => {
                self.lock().jobs.remove(&job.id);
                record.error = None;
                Ok(())
            }
            Err(kind) => {
                warn!(job_id = %job.id, error = %kind, "manual retry failed");
                {
                    let mut state = self.lock();
                    if was_parked {
                        state.parked.insert(job.id, job.clone());
                    } else if let Some(entry) = state.jobs.get_mut(&job.id) {
                        entry.in_flight = false;
                    }
                }
                record.outcome = AttemptOutcome::ManualFailure;
                record.error = Some(kind.clone());
                Err(QueueError::Failed(kind))
            }
        };
        self.log_attempt(record).await;
        outcome
    }

    async fn run(self: Arc<Self>) {
        debug!("retry worker started");
        loop {
            let due = {
                let mut state = self.lock();
                if state.jobs.is_empty() {
                    state.worker_running = false;
                    break;
                }
                let now = Instant::now();
                let mut due = Vec::new();
                for job in state.jobs.values_mut() {
                    if !job.in_flight && job.due <= now {
                        job.in_flight = true;
                        job.attempt += 1;
                        due.push(job.clone());
                    }
                }
                due
            };

            if due.is_empty() {
                tokio::select! {
                    _ = sleep(self.config.poll_interval) => {}
                    _ = self.wake.notified() => {}
                }
                continue;
            }

            debug!(count = due.len(), "dispatching due jobs");
            let timeout = self.config.executor_timeout;
            let running: Vec<_> = due
                .into_iter()
                .map(|job| {
                    let executors = self.executors.clone();
                    let target = job.clone();
                    let handle = tokio::spawn(async move { executors.run(&target, timeout).await });
                    (job, handle)
                })
                .collect();

            for (job, handle) in running {
                let result = handle.await.unwrap_or_else(|join_err| {
                    Err(FailureKind::System(format!("executor panicked: {join_err}")))
                });
                self.settle(job, result).await;
            }
        }
        debug!("retry worker idle");
        self.idle.notify_waiters();
    }

    async fn settle(&self, mut job: RetryJob, result: Result<(), FailureKind>) {
        let record = match result {
            Ok(()) => {
                if self.lock().jobs.remove(&job.id).is_none() {
                    debug!(job_id = %job.id, "job settled elsewhere");
                    return;
                }
                info!(
                    job_id = %job.id,
                    application_id = %job.application_id,
                    job_type = %job.job_type,
                    attempt = job.attempt,
                    "job succeeded"
                );
                AttemptRecord::for_job(&job, AttemptOutcome::Success)
            }
            Err(kind) => {
                job.last_error = Some(kind.clone());
                if job.is_exhausted() {
                    {
                        let mut state = self.lock();
                        if state.jobs.remove(&job.id).is_none() {
                            debug!(job_id = %job.id, "job settled elsewhere");
                            return;
                        }
                        let mut parked = job.clone();
                        parked.in_flight = false;
                        state.parked.insert(job.id, parked);
                    }
                    error!(
                        job_id = %job.id,
                        application_id = %job.application_id,
                        job_type = %job.job_type,
                        attempt = job.attempt,
                        error = %kind,
                        "job dropped after final attempt"
                    );
                    AttemptRecord::for_job(&job, AttemptOutcome::TerminalFailure)
                } else {
                    let delay_ms = job.retry.delay_for_attempt(job.attempt);
                    {
                        let mut state = self.lock();
                        let Some(entry) = state.jobs.get_mut(&job.id) else {
                            debug!(job_id = %job.id, "job settled elsewhere");
                            return;
                        };
                        entry.last_error = Some(kind.clone());
                        entry.in_flight = false;
                        entry.schedule_in(delay_ms);
                    }
                    warn!(
                        job_id = %job.id,
                        application_id = %job.application_id,
                        job_type = %job.job_type,
                        attempt = job.attempt,
                        max_attempts = job.retry.max_attempts,
                        delay_ms,
                        error = %kind,
                        "job failed, rescheduled"
                    );
                    let mut record = AttemptRecord::for_job(&job, AttemptOutcome::Failure);
                    record.next_delay_ms = Some(delay_ms);
                    record
                }
            }
        };
        self.log_attempt(record).await;
    }

    async fn log_attempt(&self, mut record: AttemptRecord) {
        record.occurred_at = Utc::now();
        if let Err(err) = self.attempts.append(record).await {
            error!(error = %err, "failed to append attempt log");
        }
    }
}
