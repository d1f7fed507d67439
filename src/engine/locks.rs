use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::state_machine::ApplicationId;

// Idle entries are dropped once the map grows past this.
const PRUNE_AT: usize = 1024;

/// One async mutex per application id: at most one evaluation/transition
/// pair in flight per application, unrelated applications run in parallel.
#[derive(Default)]
pub struct ApplicationLocks {
    locks: Mutex<HashMap<ApplicationId, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of one evaluate+transition pair.
pub struct ApplicationGuard {
    _guard: OwnedMutexGuard<()>,
}

impl ApplicationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: &ApplicationId) -> ApplicationGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() >= PRUNE_AT {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(locks.entry(id.clone()).or_default())
        };
        ApplicationGuard {
            _guard: lock.lock_owned().await,
        }
    }

    pub fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_application_is_serialized() {
        let locks = Arc::new(ApplicationLocks::new());
        let id = ApplicationId::new("app-1");

        let guard = locks.acquire(&id).await;
        let contender = {
            let locks = Arc::clone(&locks);
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_applications_do_not_block() {
        let locks = ApplicationLocks::new();
        let _a = locks.acquire(&ApplicationId::new("a")).await;
        let _b = locks.acquire(&ApplicationId::new("b")).await;
        assert_eq!(locks.tracked(), 2);
    }
}
