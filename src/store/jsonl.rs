//! Append-only JSON-lines file, one record per line.
//!
//! Used for the stage-transition audit trail and the retry attempt log so
//! history survives a restart even after the in-memory job is gone.

use std::marker::PhantomData;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::ports::{AttemptLog, AuditLog, StageTransition};
use crate::queue::AttemptRecord;
use crate::state_machine::ApplicationId;

pub struct JsonlLog<T> {
    path: PathBuf,
    // Serializes appends so lines never interleave.
    write: Mutex<()>,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonlLog<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
            _record: PhantomData,
        }
    }

    pub async fn push(&self, record: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Every record in file order. A missing file reads as empty.
    pub async fn read_all(&self) -> Result<Vec<T>, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl AuditLog for JsonlLog<StageTransition> {
    async fn append(&self, record: StageTransition) -> Result<(), StoreError> {
        self.push(&record).await
    }

    async fn history(&self, id: &ApplicationId) -> Result<Vec<StageTransition>, StoreError> {
        let mut records = self.read_all().await?;
        records.retain(|r| r.application_id == *id);
        Ok(records)
    }
}

#[async_trait]
impl AttemptLog for JsonlLog<AttemptRecord> {
    async fn append(&self, record: AttemptRecord) -> Result<(), StoreError> {
        self.push(&record).await
    }

    async fn for_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<AttemptRecord>, StoreError> {
        let mut records = self.read_all().await?;
        records.retain(|r| r.application_id == *id);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::Stage;
    use chrono::Utc;
    use tempfile::TempDir;

    fn transition(app: &str, to: Stage) -> StageTransition {
        StageTransition {
            application_id: ApplicationId::new(app),
            from_stage: Stage::New,
            to_stage: to,
            reason: "test".into(),
            actor: "tester".into(),
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn missing_file_reads_empty() {
        let tmp = TempDir::new().unwrap();
        let log: JsonlLog<StageTransition> = JsonlLog::new(tmp.path().join("audit.jsonl"));
        assert!(log.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn appends_survive_a_fresh_handle() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("audit.jsonl");

        let log: JsonlLog<StageTransition> = JsonlLog::new(&path);
        AuditLog::append(&log, transition("a", Stage::RequiresDocs))
            .await
            .unwrap();
        AuditLog::append(&log, transition("b", Stage::InReview))
            .await
            .unwrap();

        let reopened: JsonlLog<StageTransition> = JsonlLog::new(&path);
        let history = reopened.history(&ApplicationId::new("a")).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].to_stage, Stage::RequiresDocs);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[tokio::test]
    async fn corrupt_line_is_reported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("audit.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();

        let log: JsonlLog<StageTransition> = JsonlLog::new(&path);
        assert!(matches!(log.read_all().await, Err(StoreError::Json(_))));
    }
}
