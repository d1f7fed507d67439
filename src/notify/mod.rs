//! Outbound notification plumbing for stage changes.
//!
//! The engine only decides *that* someone should hear about a stage; the
//! gateway owns rendering and channel selection. Not every stage has a
//! template, and stages without one notify nobody.

mod executor;
mod gateway;

pub use executor::{NotificationExecutor, WebhookExecutor};
pub use gateway::{HttpNotificationGateway, NotificationGateway};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::state_machine::Stage;

/// Job payload for [`crate::queue::JobType::NotificationSend`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub destination: String,
    pub template: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl NotificationPayload {
    /// Payload announcing `stage`, or `None` if the stage has no template.
    pub fn for_stage(destination: &str, stage: Stage, reason: &str) -> Option<Self> {
        let template = template_for(stage)?;
        let mut variables = BTreeMap::new();
        variables.insert("stage".to_string(), stage.key().to_string());
        variables.insert("reason".to_string(), reason.to_string());
        Some(Self {
            destination: destination.to_string(),
            template: template.to_string(),
            variables,
        })
    }

    pub fn as_reminder(mut self) -> Self {
        self.variables
            .insert("reminder".to_string(), "true".to_string());
        self
    }
}

/// Template key for the message sent on entering `stage`.
pub fn template_for(stage: Stage) -> Option<&'static str> {
    match stage {
        Stage::RequiresDocs => Some("documents_required"),
        Stage::InReview => Some("under_review"),
        Stage::OffToLender => Some("sent_to_lender"),
        Stage::Accepted => Some("application_accepted"),
        Stage::New | Stage::Declined => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_and_declined_have_no_template() {
        assert!(template_for(Stage::New).is_none());
        assert!(template_for(Stage::Declined).is_none());
        assert!(NotificationPayload::for_stage("+15550100", Stage::Declined, "x").is_none());
    }

    #[test]
    fn payload_carries_stage_and_reason() {
        let payload =
            NotificationPayload::for_stage("+15550100", Stage::RequiresDocs, "2 document(s) rejected")
                .unwrap();
        assert_eq!(payload.template, "documents_required");
        assert_eq!(payload.variables["stage"], "requires_docs");
        assert_eq!(payload.variables["reason"], "2 document(s) rejected");
        assert!(!payload.variables.contains_key("reminder"));
        assert_eq!(payload.as_reminder().variables["reminder"], "true");
    }

    #[test]
    fn payload_deserializes_without_variables() {
        let payload: NotificationPayload =
            serde_json::from_str(r#"{"destination":"a@b.c","template":"under_review"}"#).unwrap();
        assert!(payload.variables.is_empty());
    }
}
