use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::FailureKind;
use crate::state_machine::ApplicationId;

pub type JobId = Uuid;

/// Longest delay the queue schedules. Longer backoffs are clamped to it.
pub const MAX_DELAY_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Upper bound on `max_attempts` accepted from configuration and the CLI.
pub const MAX_ATTEMPTS_LIMIT: u32 = 100;

/// Closed set of side effects the queue knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    NotificationSend,
    SyncCall,
    ExtractionTrigger,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::NotificationSend => write!(f, "notification_send"),
            JobType::SyncCall => write!(f, "sync_call"),
            JobType::ExtractionTrigger => write!(f, "extraction_trigger"),
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total executions allowed before the job is dropped.
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub backoff_base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Calculate the delay before the next run after `attempt` failed.
    /// delay = backoff_base_ms * 2^(attempt - 1), capped at [`MAX_DELAY_MS`].
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base_ms.saturating_mul(factor).min(MAX_DELAY_MS)
    }

    /// Delays for every reschedule the job can go through, in order.
    pub fn schedule(&self) -> Vec<u64> {
        (1..self.max_attempts)
            .map(|attempt| self.delay_for_attempt(attempt))
            .collect()
    }
}

/// A side effect owned by the retry queue until it succeeds or runs out of attempts.
#[derive(Debug, Clone)]
pub struct RetryJob {
    pub id: JobId,
    pub application_id: ApplicationId,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    /// Executions so far.
    pub attempt: u32,
    pub retry: RetryConfig,
    pub scheduled_at: DateTime<Utc>,
    pub last_error: Option<FailureKind>,
    pub created_at: DateTime<Utc>,
    pub(crate) due: Instant,
    pub(crate) in_flight: bool,
}

impl RetryJob {
    pub fn new(
        application_id: ApplicationId,
        job_type: JobType,
        payload: serde_json::Value,
        retry: RetryConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            application_id,
            job_type,
            payload,
            attempt: 0,
            retry,
            scheduled_at: now,
            last_error: None,
            created_at: now,
            due: Instant::now(),
            in_flight: false,
        }
    }

    pub(crate) fn schedule_in(&mut self, delay_ms: u64) {
        let delay_ms = delay_ms.min(MAX_DELAY_MS);
        self.due = Instant::now() + Duration::from_millis(delay_ms);
        let delta = i64::try_from(delay_ms)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .unwrap_or(TimeDelta::MAX);
        self.scheduled_at = Utc::now()
            .checked_add_signed(delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.retry.max_attempts
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            application_id: self.application_id.clone(),
            job_type: self.job_type,
            attempt: self.attempt,
            max_attempts: self.retry.max_attempts,
            scheduled_at: self.scheduled_at,
            last_error: self.last_error.clone(),
            in_flight: self.in_flight,
        }
    }
}

/// Result of one execution, as recorded in the attempt log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    /// Failed and rescheduled.
    Failure,
    /// Failed on the last allowed attempt; the job was dropped.
    TerminalFailure,
    /// Operator retry that failed; the automatic schedule is untouched.
    ManualFailure,
}

/// One row of the append-only attempt log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub job_id: JobId,
    pub application_id: ApplicationId,
    pub job_type: JobType,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub error: Option<FailureKind>,
    /// Backoff applied before the next run, when rescheduled.
    pub next_delay_ms: Option<u64>,
    pub manual: bool,
    pub occurred_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub(crate) fn for_job(job: &RetryJob, outcome: AttemptOutcome) -> Self {
        Self {
            job_id: job.id,
            application_id: job.application_id.clone(),
            job_type: job.job_type,
            attempt: job.attempt,
            outcome,
            error: job.last_error.clone(),
            next_delay_ms: None,
            manual: false,
            occurred_at: Utc::now(),
        }
    }
}

/// Read-only view of a queued job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub application_id: ApplicationId,
    pub job_type: JobType,
    pub attempt: u32,
    pub max_attempts: u32,
    pub scheduled_at: DateTime<Utc>,
    pub last_error: Option<FailureKind>,
    pub in_flight: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub total_jobs: usize,
    pub jobs: Vec<JobSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_creation_defaults() {
        let job = RetryJob::new(
            ApplicationId::new("app-1"),
            JobType::NotificationSend,
            serde_json::json!({}),
            RetryConfig::default(),
        );
        assert_eq!(job.attempt, 0);
        assert_eq!(job.retry.max_attempts, 3);
        assert!(job.last_error.is_none());
        assert!(!job.is_exhausted());
    }

    #[test]
    fn retry_config_exponential_backoff() {
        let config = RetryConfig {
            max_attempts: 5,
            backoff_base_ms: 30_000,
        };
        assert_eq!(config.delay_for_attempt(1), 30_000);
        assert_eq!(config.delay_for_attempt(2), 60_000);
        assert_eq!(config.delay_for_attempt(3), 120_000);
        assert_eq!(config.delay_for_attempt(4), 240_000);
    }

    #[test]
    fn schedule_has_one_delay_per_reschedule() {
        let config = RetryConfig {
            max_attempts: 3,
            backoff_base_ms: 1_000,
        };
        assert_eq!(config.schedule(), vec![1_000, 2_000]);
    }

    #[test]
    fn backoff_is_capped_instead_of_overflowing() {
        let config = RetryConfig {
            max_attempts: 100,
            backoff_base_ms: 30_000,
        };
        assert_eq!(config.delay_for_attempt(39), MAX_DELAY_MS);
        assert_eq!(config.delay_for_attempt(90), MAX_DELAY_MS);

        let huge = RetryConfig {
            max_attempts: 3,
            backoff_base_ms: u64::MAX,
        };
        assert_eq!(huge.delay_for_attempt(1), MAX_DELAY_MS);
    }

    #[test]
    fn huge_delay_schedules_forward_within_cap() {
        let mut job = RetryJob::new(
            ApplicationId::new("app-3"),
            JobType::SyncCall,
            serde_json::Value::Null,
            RetryConfig::default(),
        );
        let before = Utc::now();
        let instant_before = Instant::now();

        for delay in [1u64 << 62, u64::MAX] {
            job.schedule_in(delay);
            let ahead = job.scheduled_at - before;
            assert!(ahead >= TimeDelta::milliseconds(MAX_DELAY_MS as i64));
            assert!(ahead < TimeDelta::milliseconds(MAX_DELAY_MS as i64 + 60_000));
            assert!(job.due >= instant_before + Duration::from_millis(MAX_DELAY_MS));
        }
    }

    #[test]
    fn job_type_display_matches_serde() {
        for job_type in [
            JobType::NotificationSend,
            JobType::SyncCall,
            JobType::ExtractionTrigger,
        ] {
            let json = serde_json::to_string(&job_type).unwrap();
            assert_eq!(json, format!("\"{job_type}\""));
        }
    }

    #[test]
    fn snapshot_reflects_job() {
        let mut job = RetryJob::new(
            ApplicationId::new("app-2"),
            JobType::SyncCall,
            serde_json::json!({"crm": "update"}),
            RetryConfig::default(),
        );
        job.attempt = 2;
        job.last_error = Some(FailureKind::System("down".into()));
        let snap = job.snapshot();
        assert_eq!(snap.id, job.id);
        assert_eq!(snap.attempt, 2);
        assert_eq!(snap.max_attempts, 3);
        assert_eq!(snap.last_error, Some(FailureKind::System("down".into())));
    }
}
