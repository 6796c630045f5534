//! Read-only query methods on [`WorktreeMonitor`].
//!
//! Every method takes the registry lock internally, converts to owned
//! snapshots and releases the lock before returning.

use crate::git::GitBackend;

use super::core::WorktreeMonitor;
use super::types::{ApiError, WorktreeSnapshot};

impl<G: GitBackend> WorktreeMonitor<G> {
    /// All monitored worktrees, main worktree first
    pub fn list_worktrees(&self) -> Vec<WorktreeSnapshot> {
        self.engine().snapshots()
    }

    /// One worktree by id
    pub fn get_worktree(&self, id: &str) -> Result<WorktreeSnapshot, ApiError> {
        self.engine()
            .snapshot(id)
            .ok_or_else(|| ApiError::WorktreeNotFound { id: id.to_string() })
    }

    pub fn worktree_count(&self) -> usize {
        self.engine().monitor_count()
    }

    pub fn active_worktree_id(&self) -> Option<String> {
        self.engine().active_worktree_id()
    }

    /// The worktree the user is currently looking at
    pub fn active_worktree(&self) -> Option<WorktreeSnapshot> {
        self.active_worktree_id()
            .and_then(|id| self.engine().snapshot(&id))
    }
}
