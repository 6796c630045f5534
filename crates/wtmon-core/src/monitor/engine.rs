//! Monitor engine: owns the registry and every background task.
//!
//! The engine is split across several files by concern:
//! - `engine.rs` (this file): construction, timers, teardown
//! - `scheduler.rs`: refresh jobs and poll scheduling
//! - `reconcile.rs`: registry reconciliation, activity tiers, enrichment
//! - `watch.rs`: filesystem watcher wiring

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::RngExt;
use tokio::runtime::Handle;
use tracing::debug;

use super::queue::RefreshQueue;
use super::registry::{MonitorRegistry, RemovalRefused};
use super::state::{MonitorState, TimerHandle};
use crate::api::events::SnapshotEmitter;
use crate::api::types::{ApiError, WorktreeSnapshot};
use crate::git::{GitBackend, IssueExtractor, StatusCache, WorktreeDiscoveryCache};
use crate::mood::{Mood, MoodClassifier};
use crate::notes::NoteReader;
use crate::watcher::{GitWatcher, WatcherFactory};

/// Summary shown on the main worktree when something tried to remove it
pub(crate) const MAIN_REMOVAL_REFUSED_SUMMARY: &str =
    "Main worktree cannot be removed while the project is open";

/// Which timer slot on a monitor a timer task belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    Poll,
    Breaker,
    Debounce,
}

/// Collaborators and tunables the engine is assembled from
pub struct EngineParts<G: GitBackend> {
    pub git: Arc<G>,
    pub mood: Arc<dyn MoodClassifier>,
    pub issues: Arc<dyn IssueExtractor>,
    pub notes: Arc<dyn NoteReader>,
    pub watchers: Arc<dyn WatcherFactory>,
    pub status_cache: StatusCache,
    pub discovery: WorktreeDiscoveryCache,
    pub queue: RefreshQueue,
    pub emitter: SnapshotEmitter,
    pub runtime: Handle,
}

/// Worktree monitoring engine
pub struct Engine<G: GitBackend> {
    pub(crate) git: Arc<G>,
    pub(crate) registry: Mutex<MonitorRegistry>,
    pub(crate) status_cache: StatusCache,
    pub(crate) discovery: WorktreeDiscoveryCache,
    pub(crate) queue: RefreshQueue,
    pub(crate) emitter: SnapshotEmitter,
    pub(crate) mood: Arc<dyn MoodClassifier>,
    pub(crate) issues: Arc<dyn IssueExtractor>,
    pub(crate) notes: Arc<dyn NoteReader>,
    pub(crate) watchers: Arc<dyn WatcherFactory>,
    /// Canonical root of the loaded project
    project_root: RwLock<Option<PathBuf>>,
    /// Runtime timers and watcher callbacks are spawned onto
    runtime: Handle,
    self_ref: Weak<Self>,
    next_token: AtomicU64,
}

impl<G: GitBackend> Engine<G> {
    pub fn new(parts: EngineParts<G>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            git: parts.git,
            registry: Mutex::new(MonitorRegistry::new()),
            status_cache: parts.status_cache,
            discovery: parts.discovery,
            queue: parts.queue,
            emitter: parts.emitter,
            mood: parts.mood,
            issues: parts.issues,
            notes: parts.notes,
            watchers: parts.watchers,
            project_root: RwLock::new(None),
            runtime: parts.runtime,
            self_ref: self_ref.clone(),
            next_token: AtomicU64::new(1),
        })
    }

    pub fn emitter(&self) -> &SnapshotEmitter {
        &self.emitter
    }

    pub fn project_root(&self) -> Option<PathBuf> {
        self.project_root.read().clone()
    }

    /// Point the engine at a project root (does not touch monitors)
    pub fn set_project_root(&self, root: &Path) {
        let key = WorktreeDiscoveryCache::canonical_key(root);
        self.emitter.set_project(&key.to_string_lossy());
        *self.project_root.write() = Some(key);
    }

    pub(crate) fn clear_project_root(&self) {
        self.emitter.set_project("");
        *self.project_root.write() = None;
    }

    pub(crate) fn weak(&self) -> Weak<Self> {
        self.self_ref.clone()
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Snapshot of one monitor
    pub fn snapshot(&self, id: &str) -> Option<WorktreeSnapshot> {
        self.registry.lock().get(id).map(WorktreeSnapshot::from_state)
    }

    /// Snapshots of every monitor, main worktree first then by id
    pub fn snapshots(&self) -> Vec<WorktreeSnapshot> {
        let reg = self.registry.lock();
        let mut list: Vec<WorktreeSnapshot> = reg.iter().map(WorktreeSnapshot::from_state).collect();
        list.sort_by(|a, b| {
            b.is_main_worktree
                .cmp(&a.is_main_worktree)
                .then_with(|| a.id.cmp(&b.id))
        });
        list
    }

    pub fn monitor_count(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn active_worktree_id(&self) -> Option<String> {
        self.registry.lock().active_worktree_id.clone()
    }

    /// Publish the current state of `m` (caller holds the registry lock)
    pub(crate) fn emit_snapshot(&self, m: &MonitorState) {
        self.emitter.emit_update(WorktreeSnapshot::from_state(m));
    }

    // =========================================================
    // Timers
    // =========================================================

    /// Spawn a one-shot timer for monitor `id`.
    ///
    /// The caller stores the returned handle in the slot matching `kind`.
    pub(crate) fn spawn_timer(&self, id: &str, kind: TimerKind, delay: Duration) -> TimerHandle {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let weak = self.weak();
        let id = id.to_string();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(engine) = weak.upgrade() {
                engine.fire_timer(&id, kind, token).await;
            }
        });
        TimerHandle::new(token, task.abort_handle())
    }

    /// Run a timer that elapsed. Does nothing if it was replaced or cancelled
    /// after it started sleeping.
    async fn fire_timer(&self, id: &str, kind: TimerKind, token: u64) {
        let force = {
            let mut reg = self.registry.lock();
            let Some(m) = reg.get_mut(id) else {
                return;
            };
            let slot = match kind {
                TimerKind::Poll => &mut m.poll_timer,
                TimerKind::Breaker => &mut m.breaker_timer,
                TimerKind::Debounce => &mut m.git_watch_debounce_timer,
            };
            if slot.as_ref().map(|t| t.token) != Some(token) {
                return;
            }
            // Clear without aborting: this task is the one running
            *slot = None;
            if kind == TimerKind::Debounce {
                m.git_watch_refresh_pending = false;
            }
            kind == TimerKind::Breaker
        };

        let outcome = self.refresh_monitor(id, force).await;
        debug!(worktree_id = %id, ?kind, ?outcome, "Timer refresh finished");
    }

    // =========================================================
    // Stop / removal
    // =========================================================

    /// Remove a monitor on request.
    ///
    /// The main worktree is refused: it stays registered with an error mood
    /// and an explanatory summary.
    pub fn remove_monitor(&self, id: &str) -> Result<(), ApiError> {
        let watcher = {
            let mut reg = self.registry.lock();
            match reg.remove(id) {
                Ok(mut m) => {
                    if reg.active_worktree_id.as_deref() == Some(id) {
                        reg.active_worktree_id = None;
                    }
                    let watcher = m.stop();
                    self.status_cache.invalidate(m.path());
                    self.emitter.emit_removed(id);
                    watcher
                }
                Err(RemovalRefused::MainWorktree) => {
                    tracing::warn!(worktree_id = %id, "Refusing to remove the main worktree monitor");
                    if let Some(m) = reg.get_mut(id) {
                        m.mood = Mood::Error;
                        m.summary = MAIN_REMOVAL_REFUSED_SUMMARY.to_string();
                        m.updated_at = chrono::Utc::now().timestamp_millis();
                        self.emit_snapshot(m);
                    }
                    return Err(ApiError::MainWorktreeProtected { id: id.to_string() });
                }
                Err(RemovalRefused::NotFound) => {
                    return Err(ApiError::WorktreeNotFound { id: id.to_string() });
                }
            }
        };

        if let Some(root) = self.project_root() {
            self.discovery.invalidate(&root);
        }
        dispose_watchers(watcher);
        debug!(worktree_id = %id, "Monitor removed");
        Ok(())
    }

    /// Stop every monitor and drop all cached state.
    ///
    /// Returns once every refresh job that already held or waited for a queue
    /// slot has finished.
    pub async fn teardown(&self) {
        let watchers: Vec<Box<dyn GitWatcher>> = {
            let mut reg = self.registry.lock();
            let mut drained = reg.drain_all();
            let watchers = drained.iter_mut().filter_map(|m| m.stop()).collect();
            watchers
        };
        let count = watchers.len();
        dispose_watchers(watchers);

        self.status_cache.clear();
        self.discovery.clear();
        self.queue.drain().await;
        debug!(watchers = count, "Engine torn down");
    }
}

/// Dispose detached watchers. Call without the registry lock held.
pub(crate) fn dispose_watchers(watchers: impl IntoIterator<Item = Box<dyn GitWatcher>>) {
    for mut watcher in watchers {
        watcher.dispose();
    }
}

/// Uniform random jitter in `0..=max_ms`
pub(crate) fn jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    rand::rng().random_range(0..=max_ms)
}
