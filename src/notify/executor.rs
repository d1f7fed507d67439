use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::NotificationPayload;
use super::gateway::{NotificationGateway, classify_status};
use crate::error::FailureKind;
use crate::queue::{JobExecutor, JobType, RetryJob};
use crate::state_machine::ApplicationId;

/// Runs `notification_send` jobs through a [`NotificationGateway`].
pub struct NotificationExecutor<G> {
    gateway: Arc<G>,
}

impl<G: NotificationGateway> NotificationExecutor<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl<G: NotificationGateway + 'static> JobExecutor for NotificationExecutor<G> {
    async fn execute(&self, job: &RetryJob) -> Result<(), FailureKind> {
        let payload: NotificationPayload = serde_json::from_value(job.payload.clone())
            .map_err(|err| FailureKind::Business(format!("malformed notification payload: {err}")))?;
        self.gateway.send(&payload).await
    }
}

/// Posts the job payload to a fixed URL. Used for sync calls and
/// extraction triggers, whose receivers do the real work.
pub struct WebhookExecutor {
    client: Client,
    url: String,
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    job_id: String,
    application_id: &'a ApplicationId,
    job_type: JobType,
    attempt: u32,
    payload: &'a serde_json::Value,
}

impl WebhookExecutor {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl JobExecutor for WebhookExecutor {
    async fn execute(&self, job: &RetryJob) -> Result<(), FailureKind> {
        let body = WebhookBody {
            job_id: job.id.to_string(),
            application_id: &job.application_id,
            job_type: job.job_type,
            attempt: job.attempt,
            payload: &job.payload,
        };
        let response = self
            .client
            .post(&self.url)
            .header("idempotency-key", job.id.to_string())
            .json(&body)
            .send()
            .await
            .map_err(|err| FailureKind::System(format!("{} unreachable: {err}", job.job_type)))?;

        classify_status(response).await
    }
}
