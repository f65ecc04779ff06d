//! One exclusive lock per session.
//!
//! Every cursor write and every queue renumbering for a session runs while
//! holding that session's guard, so requests against the same session are
//! applied one at a time in arrival order. Different sessions never contend.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use shared::domain::SessionId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::warn;

use crate::CoordinatorError;

#[derive(Default)]
pub struct SessionLocks {
    slots: Mutex<HashMap<SessionId, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of one coordinated operation.
#[derive(Debug)]
pub struct SessionGuard {
    _guard: OwnedMutexGuard<()>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits up to `timeout` for exclusive access to `session_id`.
    pub async fn acquire(
        &self,
        session_id: SessionId,
        timeout: Duration,
    ) -> Result<SessionGuard, CoordinatorError> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            // Slots referenced only by the map are idle: nobody holds or awaits them.
            slots.retain(|id, slot| *id == session_id || Arc::strong_count(slot) > 1);
            Arc::clone(slots.entry(session_id).or_default())
        };

        match tokio::time::timeout(timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(SessionGuard { _guard: guard }),
            Err(_) => {
                warn!(session_id = session_id.0, ?timeout, "session lock wait timed out");
                Err(CoordinatorError::Busy {
                    session_id,
                    waited: timeout,
                })
            }
        }
    }

    /// Number of sessions with a live lock slot.
    pub fn tracked_sessions(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
#[path = "tests/locks_tests.rs"]
mod tests;
