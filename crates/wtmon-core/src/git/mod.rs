//! Git collaborators: worktree discovery, change-set status and the caches
//! that keep those calls cheap.

mod cache;
mod cli;
mod discovery;
mod issue;

pub use cache::StatusCache;
pub use cli::GitCli;
pub use discovery::{DiscoveryFuture, WorktreeDiscoveryCache};
pub use issue::{BranchIssueExtractor, IssueExtractor};

use std::future::Future;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Errors reported by a [`GitBackend`].
///
/// `Clone` so one failed discovery call can be handed to every coalesced caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GitError {
    /// The worktree directory (or its git metadata) is gone
    #[error("worktree no longer exists: {path}")]
    WorktreeRemoved { path: String },

    /// Another git process holds `index.lock`
    #[error("git index is locked: {path}")]
    IndexLocked { path: String },

    /// The branch has commits not merged anywhere else
    #[error("branch '{branch}' is not fully merged")]
    UnmergedBranch { branch: String },

    /// The git command did not finish in time
    #[error("git {command} timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    /// The git command exited unsuccessfully
    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Spawning git or touching the filesystem failed
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for GitError {
    fn from(err: std::io::Error) -> Self {
        GitError::Io(err.to_string())
    }
}

/// A worktree as reported by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Worktree {
    /// Stable identifier (the worktree path as git reports it)
    pub id: String,
    /// Absolute worktree path
    pub path: PathBuf,
    /// Display name (last path component)
    pub name: String,
    /// Checked-out branch, `None` when detached
    pub branch: Option<String>,
    /// HEAD commit
    pub head: Option<String>,
    /// Whether this is the repository's primary working tree
    pub is_main_worktree: bool,
}

impl Worktree {
    /// Build a worktree record from a path, deriving id and name
    pub fn new(path: impl Into<PathBuf>, branch: Option<String>, is_main_worktree: bool) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Self {
            id: path.to_string_lossy().to_string(),
            path,
            name,
            branch,
            head: None,
            is_main_worktree,
        }
    }
}

/// Kind of change for a single file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
    Untracked,
    Conflicted,
}

/// One changed file in a worktree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileChange {
    /// Path relative to the worktree root
    pub path: String,
    pub status: FileStatus,
    /// Inserted lines (None for binary or untracked files)
    pub insertions: Option<u32>,
    /// Deleted lines (None for binary or untracked files)
    pub deletions: Option<u32>,
}

/// Change-set statistics for one worktree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GitStatus {
    pub changed_file_count: usize,
    pub changes: Vec<FileChange>,
    pub last_commit_message: Option<String>,
    /// Author time of HEAD in epoch milliseconds
    pub last_commit_timestamp_ms: Option<i64>,
}

impl GitStatus {
    /// Total inserted lines across all changes
    pub fn insertions(&self) -> u64 {
        self.changes
            .iter()
            .filter_map(|c| c.insertions)
            .map(u64::from)
            .sum()
    }

    /// Total deleted lines across all changes
    pub fn deletions(&self) -> u64 {
        self.changes
            .iter()
            .filter_map(|c| c.deletions)
            .map(u64::from)
            .sum()
    }
}

/// Everything the engine needs from git.
///
/// Implemented by [`GitCli`] for real repositories and by fakes in tests.
pub trait GitBackend: Send + Sync + 'static {
    /// Change-set statistics for the worktree at `path`
    fn status(&self, path: &Path) -> impl Future<Output = Result<GitStatus, GitError>> + Send;

    /// All worktrees of the repository rooted at `root`, main worktree first
    fn list_worktrees(
        &self,
        root: &Path,
    ) -> impl Future<Output = Result<Vec<Worktree>, GitError>> + Send;

    /// Create a worktree at `path` on a new branch `branch`, starting at `base`
    fn add_worktree(
        &self,
        root: &Path,
        path: &Path,
        branch: &str,
        base: Option<&str>,
    ) -> impl Future<Output = Result<(), GitError>> + Send;

    /// Remove the worktree at `path`
    fn remove_worktree(
        &self,
        root: &Path,
        path: &Path,
        force: bool,
    ) -> impl Future<Output = Result<(), GitError>> + Send;

    /// Delete a local branch; fails with [`GitError::UnmergedBranch`] unless `force`
    fn delete_branch(
        &self,
        root: &Path,
        branch: &str,
        force: bool,
    ) -> impl Future<Output = Result<(), GitError>> + Send;
}
