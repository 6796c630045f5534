//! Filesystem watcher wiring and self-trigger suppression.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::engine::Engine;
use super::state::MonitorState;
use crate::config::GIT_WATCH_SELF_TRIGGER_COOLDOWN_MS;
use crate::git::GitBackend;
use crate::watcher::{GitWatcher, WatchCallback};

/// How a watcher event was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchDecision {
    /// Dropped: monitor gone or stopped, or the event echoes our own refresh
    Ignored,
    /// A refresh is in flight; another one runs after it completes
    Latched,
    /// A debounced refresh was scheduled
    Scheduled,
}

impl<G: GitBackend> Engine<G> {
    /// Handle a change notification for monitor `id`.
    ///
    /// Events within the self-trigger cooldown after the monitor's own last
    /// completed refresh are ignored unless a refresh is in flight; those are
    /// most likely git touching its own metadata during `git status`.
    pub fn handle_watch_event(&self, id: &str) -> WatchDecision {
        let mut reg = self.registry.lock();
        let debounce_ms = reg.config.git_watch_debounce_ms;
        let Some(m) = reg.get_mut(id) else {
            return WatchDecision::Ignored;
        };
        if !m.is_running {
            return WatchDecision::Ignored;
        }

        let cooldown = Duration::from_millis(GIT_WATCH_SELF_TRIGGER_COOLDOWN_MS);
        let recently_completed = m
            .last_git_status_completed_at
            .is_some_and(|at| at.elapsed() < cooldown);
        if !m.is_updating && recently_completed {
            return WatchDecision::Ignored;
        }

        self.status_cache.invalidate(m.path());

        if m.is_updating {
            m.git_watch_refresh_pending = true;
            return WatchDecision::Latched;
        }

        self.schedule_debounced_refresh(m, debounce_ms);
        WatchDecision::Scheduled
    }

    /// Create and start a watcher for `m` if watching is enabled.
    ///
    /// Returns the previous watcher, if any, for disposal outside the lock.
    /// When the new watcher fails to start the poll timer stays the only
    /// refresh driver.
    pub(crate) fn attach_watcher(
        &self,
        m: &mut MonitorState,
        enabled: bool,
    ) -> Option<Box<dyn GitWatcher>> {
        let previous = m.watcher.take();
        m.watched_branch = None;
        m.watch_enabled = enabled && m.is_running;
        if !m.watch_enabled {
            return previous;
        }

        let weak = self.weak();
        let runtime = self.runtime().clone();
        let id = m.id().to_string();
        let callback: WatchCallback = Arc::new(move || {
            let weak = weak.clone();
            let id = id.clone();
            // Callbacks arrive on the watcher's own thread
            runtime.spawn(async move {
                if let Some(engine) = weak.upgrade() {
                    let decision = engine.handle_watch_event(&id);
                    tracing::trace!(worktree_id = %id, ?decision, "Watch event");
                }
            });
        });

        let mut watcher = self
            .watchers
            .create(m.path(), m.worktree.branch.as_deref(), callback);
        if watcher.start() {
            debug!(worktree_id = %m.id(), "Watcher started");
            m.watcher = Some(watcher);
            m.watched_branch = m.worktree.branch.clone();
        } else {
            warn!(worktree_id = %m.id(), "Watcher failed to start, falling back to polling");
            watcher.dispose();
        }
        previous
    }
}
