//! Action methods on [`WorktreeMonitor`].
//!
//! Discrete commands return serializable `{success, error}` results; a failed
//! command never disturbs the monitors that keep running in the background.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::git::{GitBackend, GitError, Worktree, WorktreeDiscoveryCache};
use crate::monitor::SyncOptions;

use super::core::WorktreeMonitor;
use super::types::{
    ApiError, CreateWorktreeResult, DeleteWorktreeResult, LoadProjectResult, PrInfo,
    RefreshOutcome, RefreshResult, SetActiveResult, SyncReport, WorktreeSnapshot,
};

/// Check a branch name for the mistakes git would reject later with a less
/// helpful message
fn validate_branch_name(branch: &str) -> Result<(), ApiError> {
    let invalid = |message: &str| {
        Err(ApiError::InvalidInput {
            message: message.to_string(),
        })
    };
    if branch.trim().is_empty() {
        return invalid("branch name is empty");
    }
    if branch.chars().any(char::is_whitespace) {
        return invalid("branch name contains whitespace");
    }
    if branch.starts_with('-') || branch.contains("..") || branch.ends_with('/') {
        return invalid("branch name is not a valid ref");
    }
    Ok(())
}

/// Sibling directory `<root>-<branch>` for a new worktree
fn default_worktree_path(root: &Path, branch: &str) -> PathBuf {
    let root_name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "worktree".to_string());
    let dir_name = format!("{}-{}", root_name, branch.replace('/', "-"));
    match root.parent() {
        Some(parent) => parent.join(dir_name),
        None => root.join(dir_name),
    }
}

/// Active id to keep across a rescan: the current one if it still exists,
/// otherwise the main worktree
fn pick_active(current: Option<String>, worktrees: &[Worktree]) -> Option<String> {
    current
        .filter(|id| worktrees.iter().any(|w| &w.id == id))
        .or_else(|| {
            worktrees
                .iter()
                .find(|w| w.is_main_worktree)
                .map(|w| w.id.clone())
        })
}

fn main_branch_of(worktrees: &[Worktree]) -> Option<String> {
    worktrees
        .iter()
        .find(|w| w.is_main_worktree)
        .and_then(|w| w.branch.clone())
}

impl<G: GitBackend> WorktreeMonitor<G> {
    // =========================================================
    // Helpers
    // =========================================================

    /// Return the loaded project root, or `ApiError::NoProject`
    fn require_root(&self) -> Result<PathBuf, ApiError> {
        self.project_root().ok_or(ApiError::NoProject)
    }

    /// Worktree list for `root`, through the shared discovery cache
    async fn discover(&self, root: &Path, force: bool) -> Result<Vec<Worktree>, ApiError> {
        let git = self.engine().git.clone();
        let fetch_root = root.to_path_buf();
        let worktrees = self
            .engine()
            .discovery
            .list_with(root, force, move || async move {
                git.list_worktrees(&fetch_root).await
            })
            .await?;
        Ok(worktrees)
    }

    // =========================================================
    // Project lifecycle
    // =========================================================

    /// Load (or reload) a project: discover its worktrees, reconcile the
    /// monitors and fetch every status once.
    ///
    /// Loading a different root first tears the previous project down.
    pub async fn load_project(&self, root: &Path) -> LoadProjectResult {
        match self.try_load_project(root).await {
            Ok(worktrees) => LoadProjectResult {
                success: true,
                worktrees,
                error: None,
            },
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Failed to load project");
                LoadProjectResult {
                    success: false,
                    worktrees: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn try_load_project(&self, root: &Path) -> Result<Vec<WorktreeSnapshot>, ApiError> {
        let key = WorktreeDiscoveryCache::canonical_key(root);
        if self.project_root().is_some_and(|current| current != key) {
            self.on_project_switch().await;
        }

        let worktrees = self.discover(&key, true).await?;
        self.engine().set_project_root(&key);

        let active = pick_active(self.active_worktree_id(), &worktrees);
        let main_branch = main_branch_of(&worktrees);
        let report = self.engine().sync_monitors(
            &worktrees,
            SyncOptions {
                active_id: active.as_deref(),
                main_branch: main_branch.as_deref(),
                config: Some(self.config()),
                skip_initial_status: true,
            },
        );
        info!(
            root = %key.display(),
            worktrees = worktrees.len(),
            created = report.created.len(),
            "Project loaded"
        );

        self.engine().refresh_all(false).await;
        Ok(self.list_worktrees())
    }

    /// Re-discover worktrees of the loaded project and reconcile.
    ///
    /// New worktrees get their first status in the background.
    pub async fn rescan(&self, force: bool) -> Result<SyncReport, ApiError> {
        self.rescan_with(force, false).await
    }

    /// Rescan; with `skip_initial_status` new monitors wait for the caller's
    /// own refresh instead of starting one in the background
    async fn rescan_with(
        &self,
        force: bool,
        skip_initial_status: bool,
    ) -> Result<SyncReport, ApiError> {
        let root = self.require_root()?;
        let worktrees = self.discover(&root, force).await?;
        let active = pick_active(self.active_worktree_id(), &worktrees);
        let main_branch = main_branch_of(&worktrees);
        Ok(self.engine().sync_monitors(
            &worktrees,
            SyncOptions {
                active_id: active.as_deref(),
                main_branch: main_branch.as_deref(),
                config: None,
                skip_initial_status,
            },
        ))
    }

    /// Stop every monitor and forget the project (caches included).
    ///
    /// Returns once refresh jobs already in the queue have drained.
    pub async fn on_project_switch(&self) {
        info!("Switching project, stopping all monitors");
        self.engine().teardown().await;
        self.engine().clear_project_root();
    }

    /// Shut the monitor down for good
    pub async fn dispose(&self) {
        self.engine().teardown().await;
        self.engine().clear_project_root();
    }

    // =========================================================
    // Refresh
    // =========================================================

    /// Refresh one worktree, or rescan and refresh all of them when `id` is
    /// `None`. `force` bypasses the status cache and an open circuit breaker.
    pub async fn refresh(&self, id: Option<&str>, force: bool) -> RefreshResult {
        let failed = |error: String| RefreshResult {
            success: false,
            refreshed: 0,
            error: Some(error),
        };

        let Some(id) = id else {
            if let Err(e) = self.rescan_with(force, true).await {
                return failed(e.to_string());
            }
            let outcomes = self.engine().refresh_all(force).await;
            let refreshed = outcomes
                .iter()
                .filter(|(_, o)| matches!(o, RefreshOutcome::Updated | RefreshOutcome::Unchanged))
                .count();
            return RefreshResult {
                success: true,
                refreshed,
                error: None,
            };
        };

        match self.engine().refresh_monitor(id, force).await {
            RefreshOutcome::Updated | RefreshOutcome::Unchanged => RefreshResult {
                success: true,
                refreshed: 1,
                error: None,
            },
            RefreshOutcome::Deferred | RefreshOutcome::AlreadyRunning => RefreshResult {
                success: true,
                refreshed: 0,
                error: None,
            },
            RefreshOutcome::NotFound | RefreshOutcome::Removed => {
                failed(ApiError::WorktreeNotFound { id: id.to_string() }.to_string())
            }
            RefreshOutcome::CircuitOpen => {
                failed("status checks suspended after repeated failures; retry with force".into())
            }
            RefreshOutcome::NotRunning => failed(format!("worktree is not monitored: {}", id)),
            RefreshOutcome::Failed => failed(
                self.get_worktree(id)
                    .map(|s| s.summary)
                    .unwrap_or_else(|e| e.to_string()),
            ),
        }
    }

    /// Refresh every monitor without rediscovering
    pub async fn refresh_all(&self, force: bool) -> RefreshResult {
        let outcomes = self.engine().refresh_all(force).await;
        let refreshed = outcomes
            .iter()
            .filter(|(_, o)| matches!(o, RefreshOutcome::Updated | RefreshOutcome::Unchanged))
            .count();
        RefreshResult {
            success: true,
            refreshed,
            error: None,
        }
    }

    // =========================================================
    // Worktree commands
    // =========================================================

    /// Create a worktree on a new branch and start monitoring it.
    ///
    /// `path` defaults to a `<root>-<branch>` sibling directory.
    pub async fn create_worktree(
        &self,
        branch: &str,
        base: Option<&str>,
        path: Option<&Path>,
    ) -> CreateWorktreeResult {
        match self.try_create_worktree(branch, base, path).await {
            Ok(worktree) => CreateWorktreeResult {
                success: true,
                worktree: Some(worktree),
                error: None,
            },
            Err(e) => {
                warn!(branch, error = %e, "Failed to create worktree");
                CreateWorktreeResult {
                    success: false,
                    worktree: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn try_create_worktree(
        &self,
        branch: &str,
        base: Option<&str>,
        path: Option<&Path>,
    ) -> Result<WorktreeSnapshot, ApiError> {
        validate_branch_name(branch)?;
        let root = self.require_root()?;
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_worktree_path(&root, branch));

        self.engine()
            .git
            .add_worktree(&root, &path, branch, base)
            .await?;
        info!(branch, path = %path.display(), "Worktree created");

        self.engine().discovery.invalidate(&root);
        self.rescan_with(true, true).await?;

        let wanted = WorktreeDiscoveryCache::canonical_key(&path);
        let id = self
            .list_worktrees()
            .into_iter()
            .find(|s| WorktreeDiscoveryCache::canonical_key(Path::new(&s.path)) == wanted)
            .map(|s| s.id)
            .ok_or_else(|| ApiError::WorktreeNotFound {
                id: path.to_string_lossy().to_string(),
            })?;

        self.engine().refresh_monitor(&id, true).await;
        self.get_worktree(&id)
    }

    /// Remove a worktree from disk and stop monitoring it.
    ///
    /// The main worktree and the active worktree are refused. With
    /// `delete_branch` the branch is deleted too; unmerged branches need
    /// `force`.
    pub async fn delete_worktree(
        &self,
        id: &str,
        force: bool,
        delete_branch: bool,
    ) -> DeleteWorktreeResult {
        match self.try_delete_worktree(id, force, delete_branch).await {
            Ok(()) => DeleteWorktreeResult {
                success: true,
                id: id.to_string(),
                error: None,
            },
            Err(e) => {
                warn!(worktree_id = %id, error = %e, "Failed to delete worktree");
                DeleteWorktreeResult {
                    success: false,
                    id: id.to_string(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn try_delete_worktree(
        &self,
        id: &str,
        force: bool,
        delete_branch: bool,
    ) -> Result<(), ApiError> {
        let root = self.require_root()?;
        let worktree = self.get_worktree(id)?;
        if worktree.is_main_worktree {
            return Err(ApiError::MainWorktreeProtected { id: id.to_string() });
        }
        if self.active_worktree_id().as_deref() == Some(id) {
            return Err(ApiError::ActiveWorktreeProtected { id: id.to_string() });
        }

        let git = &self.engine().git;
        git.remove_worktree(&root, Path::new(&worktree.path), force)
            .await?;

        // A refresh may already have noticed the directory vanish
        match self.engine().remove_monitor(id) {
            Ok(()) | Err(ApiError::WorktreeNotFound { .. }) => {}
            Err(e) => return Err(e),
        }
        self.engine().discovery.invalidate(&root);
        info!(worktree_id = %id, "Worktree deleted");

        if let (true, Some(branch)) = (delete_branch, worktree.branch.as_deref()) {
            git.delete_branch(&root, branch, force)
                .await
                .map_err(|e| match e {
                    GitError::UnmergedBranch { branch } => ApiError::UnmergedBranch { branch },
                    other => ApiError::Git(other),
                })?;
            info!(branch, "Branch deleted");
        }
        Ok(())
    }

    /// Make `id` the active worktree (faster polling, immediate refresh);
    /// `None` clears the active worktree.
    pub async fn set_active_worktree(&self, id: Option<&str>) -> SetActiveResult {
        match self.engine().set_active_worktree(id).await {
            Ok(()) => SetActiveResult {
                success: true,
                active_worktree_id: self.active_worktree_id(),
                error: None,
            },
            Err(e) => SetActiveResult {
                success: false,
                active_worktree_id: self.active_worktree_id(),
                error: Some(e.to_string()),
            },
        }
    }

    // =========================================================
    // Enrichment
    // =========================================================

    /// Merge pull-request data for a worktree; `None` clears it
    pub fn apply_pr_info(&self, id: &str, pr: Option<PrInfo>) -> Result<(), ApiError> {
        self.engine().apply_pr_info(id, pr)
    }

    /// Attach an issue title; returns false if the issue number no longer matches
    pub fn apply_issue_title(
        &self,
        id: &str,
        issue_number: u64,
        title: Option<String>,
    ) -> Result<bool, ApiError> {
        self.engine().apply_issue_title(id, issue_number, title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use crate::api::WorktreeMonitorBuilder;
    use crate::git::GitStatus;
    use crate::watcher::{GitWatcher, WatchCallback, WatcherFactory};

    /// In-memory repository: worktree list plus recorded commands
    #[derive(Default)]
    struct MemoryGit {
        worktrees: Mutex<Vec<Worktree>>,
        status_paths: Mutex<Vec<PathBuf>>,
        list_calls: AtomicUsize,
        unmerged: Mutex<Vec<String>>,
        deleted_branches: Mutex<Vec<String>>,
    }

    impl GitBackend for MemoryGit {
        async fn status(&self, path: &Path) -> Result<GitStatus, GitError> {
            self.status_paths.lock().push(path.to_path_buf());
            Ok(GitStatus::default())
        }

        async fn list_worktrees(&self, _root: &Path) -> Result<Vec<Worktree>, GitError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.worktrees.lock().clone())
        }

        async fn add_worktree(
            &self,
            _root: &Path,
            path: &Path,
            branch: &str,
            _base: Option<&str>,
        ) -> Result<(), GitError> {
            self.worktrees
                .lock()
                .push(Worktree::new(path, Some(branch.to_string()), false));
            Ok(())
        }

        async fn remove_worktree(&self, _root: &Path, path: &Path, _force: bool) -> Result<(), GitError> {
            self.worktrees.lock().retain(|w| w.path != path);
            Ok(())
        }

        async fn delete_branch(&self, _root: &Path, branch: &str, force: bool) -> Result<(), GitError> {
            if !force && self.unmerged.lock().iter().any(|b| b == branch) {
                return Err(GitError::UnmergedBranch {
                    branch: branch.to_string(),
                });
            }
            self.deleted_branches.lock().push(branch.to_string());
            Ok(())
        }
    }

    struct NullWatcher;

    impl GitWatcher for NullWatcher {
        fn start(&mut self) -> bool {
            true
        }

        fn dispose(&mut self) {}
    }

    struct NullWatchers;

    impl WatcherFactory for NullWatchers {
        fn create(&self, _: &Path, _: Option<&str>, _: WatchCallback) -> Box<dyn GitWatcher> {
            Box::new(NullWatcher)
        }
    }

    /// Root path that does not exist, so canonical_key leaves it untouched
    const ROOT: &str = "/nonexistent/wtmon/repo";

    fn setup() -> (Arc<MemoryGit>, WorktreeMonitor<MemoryGit>) {
        let git = Arc::new(MemoryGit::default());
        git.worktrees.lock().extend([
            Worktree::new(ROOT, Some("main".into()), true),
            Worktree::new("/nonexistent/wtmon/repo-feature", Some("feature/5-x".into()), false),
        ]);
        let monitor = WorktreeMonitorBuilder::from_shared_git(git.clone())
            .with_watcher_factory(Arc::new(NullWatchers))
            .build();
        (git, monitor)
    }

    #[test]
    fn test_validate_branch_name() {
        assert!(validate_branch_name("feature/login").is_ok());
        assert!(validate_branch_name("").is_err());
        assert!(validate_branch_name("has space").is_err());
        assert!(validate_branch_name("-x").is_err());
        assert!(validate_branch_name("a..b").is_err());
    }

    #[test]
    fn test_default_worktree_path() {
        assert_eq!(
            default_worktree_path(Path::new("/src/app"), "feature/login"),
            PathBuf::from("/src/app-feature-login")
        );
    }

    #[tokio::test]
    async fn test_load_project() {
        let (_git, monitor) = setup();
        let result = monitor.load_project(Path::new(ROOT)).await;

        assert!(result.success);
        assert_eq!(result.worktrees.len(), 2);
        assert!(result.worktrees[0].is_main_worktree);
        assert_eq!(result.worktrees[0].summary, "Clean");
        assert_eq!(result.worktrees[1].issue_number, Some(5));
        assert_eq!(monitor.active_worktree_id().as_deref(), Some(ROOT));
        assert_eq!(monitor.project_root(), Some(PathBuf::from(ROOT)));
    }

    #[tokio::test]
    async fn test_commands_require_project() {
        let (_git, monitor) = setup();
        let result = monitor.create_worktree("feature/x", None, None).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no project loaded"));

        let result = monitor.refresh(None, false).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_create_and_delete_worktree() {
        let (git, monitor) = setup();
        monitor.load_project(Path::new(ROOT)).await;

        let created = monitor.create_worktree("fix/gh-8", None, None).await;
        assert!(created.success, "{:?}", created.error);
        let snap = created.worktree.unwrap();
        assert_eq!(snap.path, "/nonexistent/wtmon/repo-fix-gh-8");
        assert_eq!(snap.issue_number, Some(8));
        assert_eq!(snap.summary, "Clean");
        assert_eq!(monitor.worktree_count(), 3);

        // Exactly one status check for the new worktree, no background duplicate
        tokio::time::sleep(Duration::from_millis(50)).await;
        let new_path = PathBuf::from("/nonexistent/wtmon/repo-fix-gh-8");
        let checks = git.status_paths.lock().iter().filter(|p| **p == new_path).count();
        assert_eq!(checks, 1);

        let deleted = monitor.delete_worktree(&snap.id, false, true).await;
        assert!(deleted.success, "{:?}", deleted.error);
        assert_eq!(monitor.worktree_count(), 2);
        assert_eq!(git.deleted_branches.lock().clone(), vec!["fix/gh-8".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_refusals() {
        let (git, monitor) = setup();
        monitor.load_project(Path::new(ROOT)).await;

        let result = monitor.delete_worktree(ROOT, true, false).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("main worktree"));

        let feature = "/nonexistent/wtmon/repo-feature";
        assert!(monitor.set_active_worktree(Some(feature)).await.success);
        let result = monitor.delete_worktree(feature, true, false).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("active worktree"));

        monitor.set_active_worktree(Some(ROOT)).await;
        git.unmerged.lock().push("feature/5-x".into());
        let result = monitor.delete_worktree(feature, false, true).await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("branch 'feature/5-x' has unmerged changes; use force to delete it")
        );
        // The worktree itself is gone; only the branch survived
        assert!(monitor.get_worktree(feature).is_err());
    }

    #[tokio::test]
    async fn test_refresh_single_and_unknown() {
        let (_git, monitor) = setup();
        monitor.load_project(Path::new(ROOT)).await;

        let result = monitor.refresh(Some(ROOT), true).await;
        assert!(result.success);
        assert_eq!(result.refreshed, 1);

        let result = monitor.refresh(Some("/nope"), false).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("worktree not found: /nope"));
    }

    #[tokio::test]
    async fn test_rescan_coalesces_discovery() {
        let (git, monitor) = setup();
        monitor.load_project(Path::new(ROOT)).await;
        let before = git.list_calls.load(Ordering::SeqCst);

        let (a, b) = tokio::join!(monitor.rescan(false), monitor.rescan(false));
        assert!(a.is_ok() && b.is_ok());
        // Load populated the cache; both rescans hit it within the TTL
        assert_eq!(git.list_calls.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn test_project_switch_clears_monitors() {
        let (_git, monitor) = setup();
        monitor.load_project(Path::new(ROOT)).await;
        assert_eq!(monitor.worktree_count(), 2);

        monitor.on_project_switch().await;
        assert_eq!(monitor.worktree_count(), 0);
        assert!(monitor.project_root().is_none());
        assert!(monitor.active_worktree_id().is_none());
    }
}
