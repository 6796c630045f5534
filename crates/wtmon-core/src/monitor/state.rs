use std::path::Path;
use std::time::{Instant, UNIX_EPOCH};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task::AbortHandle;

use super::strategy::PollingStrategy;
use crate::config::EffectiveConfig;
use crate::git::{GitStatus, Worktree};
use crate::mood::Mood;
use crate::notes::AiNote;
use crate::watcher::GitWatcher;

/// A scheduled timer task. `token` identifies it so a firing timer can tell
/// whether it is still the one registered on the monitor.
#[derive(Debug)]
pub struct TimerHandle {
    pub token: u64,
    abort: AbortHandle,
}

impl TimerHandle {
    pub fn new(token: u64, abort: AbortHandle) -> Self {
        Self { token, abort }
    }

    pub fn cancel(self) {
        self.abort.abort();
    }
}

/// Cancel the timer in `slot`, if any. Idempotent.
pub fn cancel_timer(slot: &mut Option<TimerHandle>) {
    if let Some(handle) = slot.take() {
        handle.cancel();
    }
}

/// Everything the engine tracks for one worktree.
///
/// Owned by [`MonitorRegistry`](super::registry::MonitorRegistry); all
/// mutation goes through the engine while it holds the registry lock.
pub struct MonitorState {
    // Identity
    pub worktree: Worktree,
    pub is_current: bool,

    // Published status
    pub changes: Option<GitStatus>,
    pub modified_count: usize,
    pub mood: Mood,
    pub summary: String,
    pub last_activity_timestamp: Option<i64>,
    /// Set once at creation from directory metadata
    created_at: Option<i64>,
    pub ai_note: Option<AiNote>,

    // Enrichment written by collaborators
    pub issue_number: Option<u64>,
    pub issue_title: Option<String>,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
    pub pr_state: Option<String>,
    pub pr_title: Option<String>,

    /// Fingerprint of the last emitted status
    pub previous_state_hash: String,
    /// Epoch ms of the last published change (snapshot timestamp)
    pub updated_at: i64,

    // Lifecycle
    pub is_running: bool,
    pub is_updating: bool,
    pub polling_enabled: bool,
    pub has_initial_status: bool,
    /// Bumped on every stop; refresh results from an older generation are dropped
    /// without touching the monitor
    pub generation: u64,

    // Scheduling
    pub polling_interval: u64,
    pub strategy: PollingStrategy,
    pub watcher: Option<Box<dyn GitWatcher>>,
    /// Watching was requested; stays set when the watcher failed to start
    pub watch_enabled: bool,
    /// Branch the current watcher was attached for
    pub watched_branch: Option<String>,
    pub poll_timer: Option<TimerHandle>,
    pub breaker_timer: Option<TimerHandle>,
    pub git_watch_debounce_timer: Option<TimerHandle>,
    pub git_watch_refresh_pending: bool,
    pub last_git_status_completed_at: Option<Instant>,
}

impl MonitorState {
    /// Create a stopped monitor for `worktree`
    pub fn new(worktree: Worktree, is_current: bool, config: &EffectiveConfig) -> Self {
        let created_at = directory_created_at(&worktree.path);
        let polling_interval = config.interval_for(is_current);
        let mut strategy = PollingStrategy::new(polling_interval);
        strategy.update_config(
            config.adaptive_backoff,
            config.poll_interval_max,
            config.circuit_breaker_threshold,
        );

        Self {
            worktree,
            is_current,
            changes: None,
            modified_count: 0,
            mood: Mood::default(),
            summary: "Loading...".to_string(),
            last_activity_timestamp: None,
            created_at,
            ai_note: None,
            issue_number: None,
            issue_title: None,
            pr_number: None,
            pr_url: None,
            pr_state: None,
            pr_title: None,
            previous_state_hash: String::new(),
            updated_at: chrono::Utc::now().timestamp_millis(),
            is_running: false,
            is_updating: false,
            polling_enabled: false,
            has_initial_status: false,
            generation: 0,
            polling_interval,
            strategy,
            watcher: None,
            watch_enabled: false,
            watched_branch: None,
            poll_timer: None,
            breaker_timer: None,
            git_watch_debounce_timer: None,
            git_watch_refresh_pending: false,
            last_git_status_completed_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.worktree.id
    }

    pub fn path(&self) -> &Path {
        &self.worktree.path
    }

    pub fn created_at(&self) -> Option<i64> {
        self.created_at
    }

    pub fn has_watcher(&self) -> bool {
        self.watcher.is_some()
    }

    /// Apply tier interval and strategy knobs from `config`.
    ///
    /// Returns true if the base interval changed.
    pub fn apply_config(&mut self, config: &EffectiveConfig) -> bool {
        let interval = config.interval_for(self.is_current);
        let changed = interval != self.polling_interval;
        self.polling_interval = interval;
        self.strategy.set_base_interval(interval);
        self.strategy.update_config(
            config.adaptive_backoff,
            config.poll_interval_max,
            config.circuit_breaker_threshold,
        );
        changed
    }

    /// Drop issue/PR data that belonged to a previous branch
    pub fn clear_enrichment(&mut self) {
        self.issue_number = None;
        self.issue_title = None;
        self.pr_number = None;
        self.pr_url = None;
        self.pr_state = None;
        self.pr_title = None;
    }

    /// Cancel every timer and detach the watcher.
    ///
    /// The watcher is handed back so the caller can dispose of it after
    /// releasing the registry lock.
    pub fn stop(&mut self) -> Option<Box<dyn GitWatcher>> {
        self.is_running = false;
        self.is_updating = false;
        self.polling_enabled = false;
        self.generation = self.generation.wrapping_add(1);
        cancel_timer(&mut self.poll_timer);
        cancel_timer(&mut self.breaker_timer);
        cancel_timer(&mut self.git_watch_debounce_timer);
        self.git_watch_refresh_pending = false;
        self.watch_enabled = false;
        self.watched_branch = None;
        self.watcher.take()
    }
}

/// Fingerprint of everything a consumer would see change after a refresh
#[derive(Serialize)]
struct Fingerprint<'a> {
    status: Option<&'a GitStatus>,
    mood: Mood,
    summary: &'a str,
    note: Option<&'a AiNote>,
}

/// Hex SHA-256 over the published status fields
pub fn state_fingerprint(
    status: Option<&GitStatus>,
    mood: Mood,
    summary: &str,
    note: Option<&AiNote>,
) -> String {
    let fingerprint = Fingerprint {
        status,
        mood,
        summary,
        note,
    };
    let bytes = serde_json::to_vec(&fingerprint).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

/// Human-readable status line
pub fn summarize(status: &GitStatus) -> String {
    match status.changed_file_count {
        0 => match &status.last_commit_message {
            Some(msg) => format!("Clean - {}", msg),
            None => "Clean".to_string(),
        },
        1 => "1 file changed".to_string(),
        n => format!("{} files changed", n),
    }
}

/// Creation time of a directory in epoch ms, falling back to mtime
fn directory_created_at(path: &Path) -> Option<i64> {
    let metadata = std::fs::metadata(path).ok()?;
    let time = metadata.created().or_else(|_| metadata.modified()).ok()?;
    time.duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as i64)
}
