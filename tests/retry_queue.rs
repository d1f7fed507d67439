use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use stagegate::error::{FailureKind, QueueError};
use stagegate::ports::AttemptLog;
use stagegate::queue::{
    AttemptOutcome, ExecutorRegistry, JobExecutor, JobType, QueueConfig, RetryConfig, RetryJob,
    RetryQueue,
};
use stagegate::state_machine::ApplicationId;
use stagegate::store::InMemoryAttemptLog;

const POLL: Duration = Duration::from_millis(100);

/// Fails every call until `healthy` is set; records when it was called.
#[derive(Default)]
struct Downstream {
    calls: Mutex<Vec<Instant>>,
    healthy: Mutex<bool>,
}

impl Downstream {
    fn calls(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }

    fn recover(&self) {
        *self.healthy.lock().unwrap() = true;
    }
}

#[async_trait]
impl JobExecutor for Downstream {
    async fn execute(&self, _job: &RetryJob) -> Result<(), FailureKind> {
        self.calls.lock().unwrap().push(Instant::now());
        if *self.healthy.lock().unwrap() {
            Ok(())
        } else {
            Err(FailureKind::System("connection refused".into()))
        }
    }
}

fn queue(downstream: Arc<Downstream>) -> (Arc<RetryQueue>, Arc<InMemoryAttemptLog>) {
    let log = Arc::new(InMemoryAttemptLog::default());
    let queue = RetryQueue::new(
        ExecutorRegistry::new().register(JobType::SyncCall, downstream),
        log.clone(),
        QueueConfig {
            poll_interval: POLL,
            executor_timeout: Duration::from_secs(5),
            default_retry: RetryConfig::default(),
        },
    );
    (queue, log)
}

fn assert_gap(from: Instant, to: Instant, expected: Duration) {
    let gap = to - from;
    assert!(
        gap >= expected && gap <= expected + POLL,
        "gap {gap:?} outside {expected:?} + poll interval"
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_job_follows_backoff_law_then_disappears() {
    let downstream = Arc::new(Downstream::default());
    let (queue, log) = queue(downstream.clone());
    let app = ApplicationId::new("app-1");
    let start = Instant::now();

    queue.enqueue_job(
        JobType::SyncCall,
        app.clone(),
        serde_json::json!({"stage": "in_review"}),
        None,
    );
    queue.wait_idle().await;

    let calls = downstream.calls();
    assert_eq!(calls.len(), 3);
    assert_gap(start, calls[0], Duration::from_millis(30_000));
    assert_gap(calls[0], calls[1], Duration::from_millis(30_000));
    assert_gap(calls[1], calls[2], Duration::from_millis(60_000));

    let records = log.for_application(&app).await.unwrap();
    let outcomes: Vec<AttemptOutcome> = records.iter().map(|r| r.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            AttemptOutcome::Failure,
            AttemptOutcome::Failure,
            AttemptOutcome::TerminalFailure
        ]
    );
    let delays: Vec<Option<u64>> = records.iter().map(|r| r.next_delay_ms).collect();
    assert_eq!(delays, vec![Some(30_000), Some(60_000), None]);
    assert_eq!(records[2].attempt, 3);

    assert_eq!(queue.status().total_jobs, 0);
    assert_eq!(queue.parked().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_retry_delivers_parked_job() {
    let downstream = Arc::new(Downstream::default());
    let (queue, log) = queue(downstream.clone());
    let app = ApplicationId::new("app-1");

    queue.enqueue_job(
        JobType::SyncCall,
        app.clone(),
        serde_json::Value::Null,
        Some(RetryConfig {
            max_attempts: 1,
            backoff_base_ms: 1_000,
        }),
    );
    queue.wait_idle().await;
    assert_eq!(queue.parked().len(), 1);

    let err = queue.retry_now(&app, JobType::SyncCall).await.unwrap_err();
    assert!(matches!(err, QueueError::Failed(FailureKind::System(_))));
    assert_eq!(queue.parked().len(), 1);

    downstream.recover();
    queue.retry_now(&app, JobType::SyncCall).await.unwrap();
    assert!(queue.parked().is_empty());

    let records = log.for_application(&app).await.unwrap();
    assert_eq!(records.len(), 3);
    assert!(records[1].manual && records[2].manual);
    assert_eq!(records[2].outcome, AttemptOutcome::Success);
    // Manual runs report the attempt count they found, they do not add to it.
    assert_eq!(records[2].attempt, 1);

    let err = queue.retry_now(&app, JobType::SyncCall).await.unwrap_err();
    assert!(matches!(err, QueueError::NoJob { .. }));
}

#[tokio::test(start_paused = true)]
async fn jobs_for_different_applications_run_independently() {
    let downstream = Arc::new(Downstream::default());
    downstream.recover();
    let (queue, log) = queue(downstream.clone());

    for name in ["app-1", "app-2", "app-3"] {
        queue.enqueue_job(
            JobType::SyncCall,
            ApplicationId::new(name),
            serde_json::Value::Null,
            None,
        );
    }
    assert_eq!(queue.status().total_jobs, 3);
    queue.wait_idle().await;

    assert_eq!(downstream.calls().len(), 3);
    for name in ["app-1", "app-2", "app-3"] {
        let records = log.for_application(&ApplicationId::new(name)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AttemptOutcome::Success);
    }
}
