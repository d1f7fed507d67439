use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::ports::{
    ApplicationRecord, ApplicationStore, AttemptLog, AuditLog, DocumentTallyProvider,
    StageTransition,
};
use crate::queue::AttemptRecord;
use crate::state_machine::{ApplicationId, DocumentTally, Stage};

/// Application table held in memory.
#[derive(Default)]
pub struct InMemoryApplications {
    records: RwLock<HashMap<ApplicationId, ApplicationRecord>>,
}

impl InMemoryApplications {
    pub async fn insert(&self, record: ApplicationRecord) {
        self.records.write().await.insert(record.id.clone(), record);
    }
}

#[async_trait]
impl ApplicationStore for InMemoryApplications {
    async fn load(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn set_stage(&self, id: &ApplicationId, stage: Stage) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::Unavailable(format!("no application {id}")))?;
        record.stage = stage;
        Ok(())
    }
}

/// Document tallies keyed by application, updated by tests and the demo.
#[derive(Default)]
pub struct InMemoryDocuments {
    tallies: RwLock<HashMap<ApplicationId, DocumentTally>>,
}

impl InMemoryDocuments {
    pub async fn set(&self, id: &ApplicationId, tally: DocumentTally) {
        self.tallies.write().await.insert(id.clone(), tally);
    }
}

#[async_trait]
impl DocumentTallyProvider for InMemoryDocuments {
    async fn document_tally(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<DocumentTally>, StoreError> {
        Ok(self.tallies.read().await.get(id).copied())
    }
}

#[derive(Default)]
pub struct InMemoryAuditLog {
    records: RwLock<Vec<StageTransition>>,
}

impl InMemoryAuditLog {
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, record: StageTransition) -> Result<(), StoreError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn history(&self, id: &ApplicationId) -> Result<Vec<StageTransition>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.application_id == *id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryAttemptLog {
    records: RwLock<Vec<AttemptRecord>>,
}

#[async_trait]
impl AttemptLog for InMemoryAttemptLog {
    async fn append(&self, record: AttemptRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn for_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<AttemptRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.application_id == *id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_stage_on_unknown_application_fails() {
        let apps = InMemoryApplications::default();
        let err = apps
            .set_stage(&ApplicationId::new("nope"), Stage::InReview)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn set_stage_updates_only_the_stage() {
        let apps = InMemoryApplications::default();
        let id = ApplicationId::new("app-1");
        apps.insert(ApplicationRecord::new(id.clone(), Stage::New).with_contact("+15550100"))
            .await;

        apps.set_stage(&id, Stage::RequiresDocs).await.unwrap();
        let record = apps.load(&id).await.unwrap().unwrap();
        assert_eq!(record.stage, Stage::RequiresDocs);
        assert_eq!(record.contact.as_deref(), Some("+15550100"));
    }

    #[tokio::test]
    async fn audit_history_is_filtered_per_application() {
        let log = InMemoryAuditLog::default();
        for app in ["a", "b", "a"] {
            log.append(StageTransition {
                application_id: ApplicationId::new(app),
                from_stage: Stage::New,
                to_stage: Stage::RequiresDocs,
                reason: "no documents uploaded".into(),
                actor: "system".into(),
                occurred_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        }
        assert_eq!(log.history(&ApplicationId::new("a")).await.unwrap().len(), 2);
        assert_eq!(log.len().await, 3);
    }
}
