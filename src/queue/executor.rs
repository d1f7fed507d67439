use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::job::{JobType, RetryJob};
use crate::error::FailureKind;

/// Runs the side effect behind one job type.
///
/// Any `Err` is treated as retryable by the queue.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &RetryJob) -> Result<(), FailureKind>;
}

/// One executor per [`JobType`], registered at startup.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<JobType, Arc<dyn JobExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, job_type: JobType, executor: Arc<dyn JobExecutor>) -> Self {
        self.executors.insert(job_type, executor);
        self
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobExecutor>> {
        self.executors.get(&job_type).cloned()
    }

    /// Run `job` through its executor, bounded by `timeout`.
    pub async fn run(&self, job: &RetryJob, timeout: Duration) -> Result<(), FailureKind> {
        let Some(executor) = self.get(job.job_type) else {
            return Err(FailureKind::System(format!(
                "no executor registered for {}",
                job.job_type
            )));
        };

        match tokio::time::timeout(timeout, executor.execute(job)).await {
            Ok(result) => result,
            Err(_) => Err(FailureKind::System(format!(
                "timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }
}
