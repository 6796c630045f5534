//! Filesystem watchers that tell the engine a worktree may have changed.
//!
//! The engine only needs `start()` / `dispose()` and a callback; the
//! [`NotifyWatcherFactory`] implementation uses the `notify` crate.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

/// Invoked on every relevant filesystem mutation
pub type WatchCallback = Arc<dyn Fn() + Send + Sync>;

/// Minimum spacing between two callbacks from one watcher
const WATCH_THROTTLE: Duration = Duration::from_millis(100);

/// Git metadata files whose change means status may have changed
const GIT_METADATA_FILES: &[&str] = &["HEAD", "index", "ORIG_HEAD", "MERGE_HEAD", "FETCH_HEAD"];

/// Handle to a running watcher for one worktree
pub trait GitWatcher: Send {
    /// Begin watching. Returns false if the watcher could not be started.
    fn start(&mut self) -> bool;

    /// Stop watching. Idempotent.
    fn dispose(&mut self);
}

/// Creates watchers for a worktree path + branch pair
pub trait WatcherFactory: Send + Sync {
    fn create(
        &self,
        path: &Path,
        branch: Option<&str>,
        on_change: WatchCallback,
    ) -> Box<dyn GitWatcher>;
}

/// Factory for [`NotifyGitWatcher`]
#[derive(Debug, Clone, Default)]
pub struct NotifyWatcherFactory;

impl WatcherFactory for NotifyWatcherFactory {
    fn create(
        &self,
        path: &Path,
        branch: Option<&str>,
        on_change: WatchCallback,
    ) -> Box<dyn GitWatcher> {
        Box::new(NotifyGitWatcher::new(path, branch, on_change))
    }
}

/// Watches a worktree's files and its git directory with `notify`
pub struct NotifyGitWatcher {
    path: PathBuf,
    branch: Option<String>,
    on_change: WatchCallback,
    watcher: Option<RecommendedWatcher>,
}

impl NotifyGitWatcher {
    pub fn new(path: &Path, branch: Option<&str>, on_change: WatchCallback) -> Self {
        Self {
            path: path.to_path_buf(),
            branch: branch.map(str::to_string),
            on_change,
            watcher: None,
        }
    }
}

impl GitWatcher for NotifyGitWatcher {
    fn start(&mut self) -> bool {
        if self.watcher.is_some() {
            return true;
        }

        let git_dir = resolve_git_dir(&self.path);
        let root = self.path.clone();
        let on_change = self.on_change.clone();
        let last_fired: Mutex<Option<Instant>> = Mutex::new(None);
        let git_dir_for_filter = git_dir.clone();

        let handler = move |res: Result<Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::debug!(error = %e, "Worktree watcher error");
                    return;
                }
            };
            if !is_relevant_event(&event, &root, git_dir_for_filter.as_deref()) {
                return;
            }
            {
                let mut last = last_fired.lock();
                if last.is_some_and(|t| t.elapsed() < WATCH_THROTTLE) {
                    return;
                }
                *last = Some(Instant::now());
            }
            on_change();
        };

        let mut watcher = match notify::recommended_watcher(handler) {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to create worktree watcher");
                return false;
            }
        };

        if let Err(e) = watcher.watch(&self.path, RecursiveMode::Recursive) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to watch worktree");
            return false;
        }

        // Linked worktrees keep HEAD/index outside the working tree
        if let Some(dir) = git_dir.filter(|d| !d.starts_with(&self.path)) {
            if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
                tracing::debug!(git_dir = %dir.display(), error = %e, "Failed to watch git dir");
            }
        }

        tracing::debug!(
            path = %self.path.display(),
            branch = self.branch.as_deref().unwrap_or("(detached)"),
            "Worktree watcher started"
        );
        self.watcher = Some(watcher);
        true
    }

    fn dispose(&mut self) {
        if self.watcher.take().is_some() {
            tracing::debug!(path = %self.path.display(), "Worktree watcher disposed");
        }
    }
}

impl Drop for NotifyGitWatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Resolve the git directory of a worktree.
///
/// For the main worktree this is `<path>/.git`; linked worktrees have a `.git`
/// file containing `gitdir: <path>`.
pub fn resolve_git_dir(worktree: &Path) -> Option<PathBuf> {
    let dot_git = worktree.join(".git");
    if dot_git.is_dir() {
        return Some(dot_git);
    }
    let content = std::fs::read_to_string(&dot_git).ok()?;
    let target = content.trim().strip_prefix("gitdir:")?.trim();
    let target = Path::new(target);
    Some(if target.is_absolute() {
        target.to_path_buf()
    } else {
        worktree.join(target)
    })
}

/// Whether an event should wake the engine.
///
/// Working-tree edits count; inside git metadata only the files that change
/// status (HEAD, index, ...) count, and lock files never do.
fn is_relevant_event(event: &Event, root: &Path, git_dir: Option<&Path>) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }

    event
        .paths
        .iter()
        .any(|p| is_relevant_path(p, root, git_dir))
}

fn is_relevant_path(path: &Path, root: &Path, git_dir: Option<&Path>) -> bool {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if file_name.ends_with(".lock") {
        return false;
    }

    let in_git_dir = git_dir.is_some_and(|d| path.starts_with(d))
        || path
            .strip_prefix(root)
            .map(|rel| {
                rel.components()
                    .any(|c| matches!(c, Component::Normal(n) if n == ".git"))
            })
            .unwrap_or(false);

    if in_git_dir {
        return GIT_METADATA_FILES.contains(&file_name.as_str())
            || path.components().any(|c| matches!(c, Component::Normal(n) if n == "refs"));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_event(kind: EventKind, path: &str) -> Event {
        Event {
            kind,
            paths: vec![PathBuf::from(path)],
            attrs: Default::default(),
        }
    }

    fn modify() -> EventKind {
        EventKind::Modify(ModifyKind::Data(DataChange::Content))
    }

    #[test]
    fn test_working_tree_edit_is_relevant() {
        let root = Path::new("/repo");
        let event = make_event(modify(), "/repo/src/main.rs");
        assert!(is_relevant_event(&event, root, Some(Path::new("/repo/.git"))));
    }

    #[test]
    fn test_git_metadata_filtering() {
        let root = Path::new("/repo");
        let git_dir = Some(Path::new("/repo/.git"));
        assert!(is_relevant_event(
            &make_event(modify(), "/repo/.git/index"),
            root,
            git_dir
        ));
        assert!(is_relevant_event(
            &make_event(modify(), "/repo/.git/refs/heads/main"),
            root,
            git_dir
        ));
        assert!(!is_relevant_event(
            &make_event(EventKind::Create(CreateKind::File), "/repo/.git/index.lock"),
            root,
            git_dir
        ));
        assert!(!is_relevant_event(
            &make_event(modify(), "/repo/.git/objects/ab/cdef"),
            root,
            git_dir
        ));
    }

    #[test]
    fn test_linked_worktree_git_dir() {
        let root = Path::new("/wt/feature");
        let git_dir = Some(Path::new("/repo/.git/worktrees/feature"));
        assert!(is_relevant_event(
            &make_event(modify(), "/repo/.git/worktrees/feature/HEAD"),
            root,
            git_dir
        ));
        assert!(!is_relevant_event(
            &make_event(modify(), "/repo/.git/worktrees/feature/logs/HEAD.tmp"),
            root,
            git_dir
        ));
    }

    #[test]
    fn test_access_events_ignored() {
        let event = make_event(EventKind::Access(AccessKind::Any), "/repo/src/main.rs");
        assert!(!is_relevant_event(&event, Path::new("/repo"), None));
    }

    #[test]
    fn test_resolve_git_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let main = tmp.path().join("main");
        std::fs::create_dir_all(main.join(".git")).unwrap();
        assert_eq!(resolve_git_dir(&main), Some(main.join(".git")));

        let linked = tmp.path().join("linked");
        std::fs::create_dir_all(&linked).unwrap();
        std::fs::write(linked.join(".git"), "gitdir: /repo/.git/worktrees/linked\n").unwrap();
        assert_eq!(
            resolve_git_dir(&linked),
            Some(PathBuf::from("/repo/.git/worktrees/linked"))
        );

        let plain = tmp.path().join("plain");
        std::fs::create_dir_all(&plain).unwrap();
        assert_eq!(resolve_git_dir(&plain), None);
    }

    #[test]
    fn test_start_and_dispose_real_watcher() {
        let tmp = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let mut watcher = NotifyWatcherFactory.create(
            tmp.path(),
            Some("main"),
            Arc::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(watcher.start());
        // Starting twice is a no-op
        assert!(watcher.start());
        watcher.dispose();
        watcher.dispose();
    }

    #[test]
    fn test_start_fails_for_missing_path() {
        let mut watcher = NotifyWatcherFactory.create(
            Path::new("/definitely/not/here/wtmon"),
            None,
            Arc::new(|| {}),
        );
        assert!(!watcher.start());
    }
}
