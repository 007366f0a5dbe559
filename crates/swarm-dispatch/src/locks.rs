//! Per-issue mutual exclusion.
//!
//! Every mutation sequence for one issue runs under that issue's lock, so two
//! events for the same issue cannot both pass the spawn duplicate check.
//! Different issues never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use coordination::IssueId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Held for the duration of one issue's event handling.
pub type IssueGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct IssueLocks {
    slots: Mutex<HashMap<IssueId, Arc<AsyncMutex<()>>>>,
}

impl IssueLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `issue`.
    pub async fn lock(&self, issue: IssueId) -> IssueGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            // Drop slots nobody holds or waits on.
            slots.retain(|id, slot| *id == issue || Arc::strong_count(slot) > 1);
            Arc::clone(slots.entry(issue).or_default())
        };
        slot.lock_owned().await
    }
}
