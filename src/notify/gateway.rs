use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use super::NotificationPayload;
use crate::error::FailureKind;

/// Delivers a notification to one destination. Rendering is the gateway's concern.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send(&self, payload: &NotificationPayload) -> Result<(), FailureKind>;
}

/// Gateway reached over HTTP: one JSON POST per notification.
pub struct HttpNotificationGateway {
    client: Client,
    url: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    destination: &'a str,
    template: &'a str,
    variables: &'a std::collections::BTreeMap<String, String>,
}

impl HttpNotificationGateway {
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
impl NotificationGateway for HttpNotificationGateway {
    async fn send(&self, payload: &NotificationPayload) -> Result<(), FailureKind> {
        let body = SendRequest {
            destination: &payload.destination,
            template: &payload.template,
            variables: &payload.variables,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|err| FailureKind::System(format!("gateway unreachable: {err}")))?;

        classify_status(response).await
    }
}

/// Map an HTTP response onto the queue's failure kinds.
///
/// 2xx succeeds, 429 and 5xx are system failures, other 4xx are business failures.
pub(crate) async fn classify_status(response: reqwest::Response) -> Result<(), FailureKind> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| "unspecified".to_string());
        return Err(FailureKind::System(format!(
            "rate limited, retry after {retry_after}"
        )));
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    let detail = format!("status {}: {message}", status.as_u16());
    if status.is_client_error() {
        Err(FailureKind::Business(detail))
    } else {
        Err(FailureKind::System(detail))
    }
}
