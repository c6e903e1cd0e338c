//! Sync status published to the host application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of the sync core's health, recomputed on demand.
///
/// Derived from the queue; never authoritative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_online: bool,
    /// End of the most recent processing pass.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Pending items, excluding failed ones.
    pub queue_length: usize,
    /// One message per failed item.
    pub errors: Vec<String>,
}

impl SyncStatus {
    /// Returns true if events are still waiting for delivery.
    pub fn has_pending(&self) -> bool {
        self.queue_length > 0
    }

    /// Returns true if some events exhausted their retries.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
