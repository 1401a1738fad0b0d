//! Queue status published to UI status indicators.

use crate::models::Operation;

/// Badge state derived from a [`SyncStatus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// No connectivity; writes are only queued
    Offline,
    /// A drain pass is running
    Syncing,
    /// Online with operations still waiting
    Pending,
    /// Online and nothing left to send
    Synced,
}

/// Snapshot of the engine's externally visible state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// Last connectivity reported by the application shell
    pub online: bool,
    /// True while a drain pass is in progress
    pub syncing: bool,
    /// Operations in `PENDING` or `RETRYING`
    pub pending_count: usize,
    /// Operations in `FAILED` or `CONFLICT`
    pub attention_count: usize,
}

impl SyncStatus {
    /// Count queue entries by status group
    pub fn from_operations(ops: &[Operation], online: bool, syncing: bool) -> Self {
        let pending_count = ops.iter().filter(|op| op.status.is_active()).count();
        let attention_count = ops.iter().filter(|op| op.status.needs_attention()).count();
        Self {
            online,
            syncing,
            pending_count,
            attention_count,
        }
    }

    pub const fn state(&self) -> SyncState {
        if !self.online {
            SyncState::Offline
        } else if self.syncing {
            SyncState::Syncing
        } else if self.pending_count > 0 {
            SyncState::Pending
        } else {
            SyncState::Synced
        }
    }

    /// Whether the failure/conflict affordance should be shown
    pub const fn needs_attention(&self) -> bool {
        self.attention_count > 0
    }
}
