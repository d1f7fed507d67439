//! Narrow interfaces to the collaborators the engine and queue depend on.
//!
//! Document storage, the application table, the audit and attempt logs and
//! the real-time channel all live outside this crate; in-memory and
//! JSON-lines implementations are in [`crate::store`] and [`crate::broadcast`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BroadcastError, StoreError};
use crate::queue::AttemptRecord;
use crate::state_machine::{ApplicationId, DocumentTally, Stage};

/// The slice of an application this crate reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: ApplicationId,
    pub stage: Stage,
    pub created_at: DateTime<Utc>,
    /// Where stage notifications go. `None` means nobody is notified.
    pub contact: Option<String>,
}

impl ApplicationRecord {
    pub fn new(id: ApplicationId, stage: Stage) -> Self {
        Self {
            id,
            stage,
            created_at: Utc::now(),
            contact: None,
        }
    }

    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = Some(contact.into());
        self
    }
}

/// Audit record written once per executed transition. Never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub application_id: ApplicationId,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub reason: String,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
}

/// Payload fanned out to real-time observers after a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEvent {
    pub name: String,
    pub application_id: ApplicationId,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub reason: String,
}

impl StageEvent {
    pub const STAGE_CHANGED: &'static str = "application.stage_changed";

    pub fn stage_changed(transition: &StageTransition) -> Self {
        Self {
            name: Self::STAGE_CHANGED.to_string(),
            application_id: transition.application_id.clone(),
            from_stage: transition.from_stage,
            to_stage: transition.to_stage,
            reason: transition.reason.clone(),
        }
    }
}

/// Owner of the single mutable `stage` field.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn load(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError>;
    /// Single atomic write keyed by application id.
    async fn set_stage(&self, id: &ApplicationId, stage: Stage) -> Result<(), StoreError>;
}

/// Read projection over the document store.
#[async_trait]
pub trait DocumentTallyProvider: Send + Sync {
    /// `None` when the application has no document record at all.
    async fn document_tally(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<DocumentTally>, StoreError>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, record: StageTransition) -> Result<(), StoreError>;
    async fn history(&self, id: &ApplicationId) -> Result<Vec<StageTransition>, StoreError>;
}

#[async_trait]
pub trait AttemptLog: Send + Sync {
    async fn append(&self, record: AttemptRecord) -> Result<(), StoreError>;
    async fn for_application(&self, id: &ApplicationId)
    -> Result<Vec<AttemptRecord>, StoreError>;
}

/// Fire-and-forget fan-out. Returns the number of observers reached.
pub trait StageBroadcast: Send + Sync {
    fn emit(&self, event: StageEvent) -> Result<usize, BroadcastError>;
}
