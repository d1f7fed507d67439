//! Real-time fan-out of stage changes to connected observers.

use tokio::sync::broadcast;
use tracing::debug;

use crate::error::BroadcastError;
use crate::ports::{StageBroadcast, StageEvent};

/// Stage-change broadcaster backed by a tokio broadcast channel.
#[derive(Clone)]
pub struct StageBroadcaster {
    tx: broadcast::Sender<StageEvent>,
}

impl StageBroadcaster {
    /// `capacity` is how many events a slow observer may lag before it skips ahead.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for StageBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

impl StageBroadcast for StageBroadcaster {
    fn emit(&self, event: StageEvent) -> Result<usize, BroadcastError> {
        let name = event.name.clone();
        let count = self
            .tx
            .send(event)
            .map_err(|_| BroadcastError::NoSubscribers(name))?;
        debug!(observers = count, "stage event broadcast");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{ApplicationId, Stage};

    fn event() -> StageEvent {
        StageEvent {
            name: StageEvent::STAGE_CHANGED.to_string(),
            application_id: ApplicationId::new("app-1"),
            from_stage: Stage::New,
            to_stage: Stage::RequiresDocs,
            reason: "no documents uploaded".into(),
        }
    }

    #[test]
    fn emit_without_observers_is_an_error() {
        let broadcaster = StageBroadcaster::default();
        assert!(matches!(
            broadcaster.emit(event()),
            Err(BroadcastError::NoSubscribers(_))
        ));
    }

    #[tokio::test]
    async fn observers_receive_events() {
        let broadcaster = StageBroadcaster::new(8);
        let mut rx = broadcaster.subscribe();
        assert_eq!(broadcaster.observer_count(), 1);

        assert_eq!(broadcaster.emit(event()).unwrap(), 1);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.to_stage, Stage::RequiresDocs);
    }
}
