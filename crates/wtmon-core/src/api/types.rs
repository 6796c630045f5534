//! Owned snapshot and result types for the Facade API.
//!
//! These types are returned by query/action methods and do not hold any lock.
//! They are safe to pass across async boundaries and serialize for a UI process.

use serde::Serialize;
use thiserror::Error;

use crate::git::{FileChange, GitError};
use crate::monitor::MonitorState;
use crate::mood::Mood;

/// Error type for Facade API operations
#[derive(Debug, Error)]
pub enum ApiError {
    /// The requested worktree is not monitored
    #[error("worktree not found: {id}")]
    WorktreeNotFound { id: String },

    /// The main worktree can be neither deleted nor unmonitored
    #[error("the main worktree cannot be removed: {id}")]
    MainWorktreeProtected { id: String },

    /// The worktree the user is looking at cannot be deleted
    #[error("cannot delete the active worktree: {id}")]
    ActiveWorktreeProtected { id: String },

    /// Branch deletion refused because of unmerged commits
    #[error("branch '{branch}' has unmerged changes; use force to delete it")]
    UnmergedBranch { branch: String },

    /// No project has been loaded
    #[error("no project loaded")]
    NoProject,

    /// Invalid input (e.g. empty branch name)
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// A git operation failed
    #[error(transparent)]
    Git(#[from] GitError),
}

/// Owned snapshot of a monitor's published fields.
///
/// Built fresh from the monitor state on demand; holds no reference to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorktreeSnapshot {
    pub id: String,
    pub path: String,
    pub name: String,
    pub branch: Option<String>,
    pub is_current: bool,
    pub is_main_worktree: bool,
    pub summary: String,
    pub modified_count: usize,
    pub changes: Vec<FileChange>,
    pub mood: Mood,
    pub last_activity_timestamp: Option<i64>,
    pub created_at: Option<i64>,
    pub ai_note: Option<String>,
    pub ai_note_timestamp: Option<i64>,
    pub issue_number: Option<u64>,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
    pub pr_state: Option<String>,
    pub pr_title: Option<String>,
    pub issue_title: Option<String>,
    /// When the published state last changed (epoch ms)
    pub timestamp: i64,
}

impl WorktreeSnapshot {
    /// Build a snapshot from a monitor (caller holds the registry lock)
    pub fn from_state(m: &MonitorState) -> Self {
        Self {
            id: m.worktree.id.clone(),
            path: m.worktree.path.to_string_lossy().to_string(),
            name: m.worktree.name.clone(),
            branch: m.worktree.branch.clone(),
            is_current: m.is_current,
            is_main_worktree: m.worktree.is_main_worktree,
            summary: m.summary.clone(),
            modified_count: m.modified_count,
            changes: m
                .changes
                .as_ref()
                .map(|s| s.changes.clone())
                .unwrap_or_default(),
            mood: m.mood,
            last_activity_timestamp: m.last_activity_timestamp,
            created_at: m.created_at(),
            ai_note: m.ai_note.as_ref().map(|n| n.content.clone()),
            ai_note_timestamp: m.ai_note.as_ref().map(|n| n.timestamp),
            issue_number: m.issue_number,
            pr_number: m.pr_number,
            pr_url: m.pr_url.clone(),
            pr_state: m.pr_state.clone(),
            pr_title: m.pr_title.clone(),
            issue_title: m.issue_title.clone(),
            timestamp: m.updated_at,
        }
    }
}

/// Pull-request data pushed by a PR detector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrInfo {
    pub number: u64,
    pub url: Option<String>,
    pub state: Option<String>,
    pub title: Option<String>,
}

/// What happened to a refresh request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// Status fetched; a snapshot was emitted
    Updated,
    /// Status fetched; nothing observable changed
    Unchanged,
    /// Status fetch failed; failure recorded
    Failed,
    /// Index was locked; retry deferred
    Deferred,
    /// Worktree vanished and its monitor was removed
    Removed,
    /// A refresh for this monitor was already running; latched as pending
    AlreadyRunning,
    /// Circuit breaker open and the request was not forced
    CircuitOpen,
    /// Monitor is not running (or was stopped mid-flight)
    NotRunning,
    NotFound,
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    /// Removals refused because the id is the main worktree
    pub refused: Vec<String>,
}

/// Result of `load-project`
#[derive(Debug, Clone, Serialize)]
pub struct LoadProjectResult {
    pub success: bool,
    pub worktrees: Vec<WorktreeSnapshot>,
    pub error: Option<String>,
}

/// Result of `refresh`
#[derive(Debug, Clone, Serialize)]
pub struct RefreshResult {
    pub success: bool,
    pub refreshed: usize,
    pub error: Option<String>,
}

/// Result of `create-worktree`
#[derive(Debug, Clone, Serialize)]
pub struct CreateWorktreeResult {
    pub success: bool,
    pub worktree: Option<WorktreeSnapshot>,
    pub error: Option<String>,
}

/// Result of `delete-worktree`
#[derive(Debug, Clone, Serialize)]
pub struct DeleteWorktreeResult {
    pub success: bool,
    pub id: String,
    pub error: Option<String>,
}

/// Result of `set-active`
#[derive(Debug, Clone, Serialize)]
pub struct SetActiveResult {
    pub success: bool,
    pub active_worktree_id: Option<String>,
    pub error: Option<String>,
}
