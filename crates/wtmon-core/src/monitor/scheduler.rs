//! Refresh jobs and poll scheduling.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use super::engine::{dispose_watchers, jitter, Engine, TimerKind};
use super::state::{cancel_timer, state_fingerprint, summarize, MonitorState};
use crate::api::types::RefreshOutcome;
use crate::config::{
    EffectiveConfig, CIRCUIT_BREAKER_JITTER_MAX_MS, GIT_WATCH_SAFETY_NET_INTERVAL_MS,
    POLL_JITTER_MAX_MS,
};
use crate::git::{GitBackend, GitError, GitStatus};
use crate::notes::AiNote;

/// Summary shown when the main worktree's directory is gone
const MAIN_MISSING_SUMMARY: &str = "Main worktree is missing or inaccessible";

/// Bookkeeping carried from a refresh job into result handling
struct RefreshJob {
    generation: u64,
    force: bool,
    /// The status came from git rather than the status cache
    fetched: bool,
    duration_ms: u64,
    queue_delay_ms: u64,
}

/// What to do with a monitor after its refresh result was applied
enum Followup {
    Keep,
    Remove,
}

impl<G: GitBackend> Engine<G> {
    /// Refresh one monitor's status.
    ///
    /// Skipped when the monitor is not running, or its circuit breaker is open
    /// and `force` is false. A call that arrives while a refresh for the same
    /// monitor is in flight is latched as pending instead.
    pub async fn refresh_monitor(&self, id: &str, force: bool) -> RefreshOutcome {
        let (path, generation) = {
            let mut reg = self.registry.lock();
            let Some(m) = reg.get_mut(id) else {
                return RefreshOutcome::NotFound;
            };
            if !m.is_running {
                return RefreshOutcome::NotRunning;
            }
            if m.strategy.is_circuit_breaker_tripped() && !force {
                return RefreshOutcome::CircuitOpen;
            }
            if m.is_updating {
                m.git_watch_refresh_pending = true;
                return RefreshOutcome::AlreadyRunning;
            }
            m.is_updating = true;
            (m.path().to_path_buf(), m.generation)
        };

        let enqueued_at = Instant::now();
        let Some(permit) = self.queue.acquire().await else {
            if let Some(m) = self.registry.lock().get_mut(id) {
                if m.generation == generation {
                    m.is_updating = false;
                }
            }
            return RefreshOutcome::NotRunning;
        };
        let queue_delay_ms = enqueued_at.elapsed().as_millis() as u64;

        // Stopped while waiting for a slot
        if !self.is_generation_current(id, generation) {
            return RefreshOutcome::NotRunning;
        }

        let started_at = Instant::now();
        let cached = if force {
            None
        } else {
            self.status_cache.get(&path)
        };
        let fetched = cached.is_none();
        let result = match cached {
            Some(status) => Ok(status),
            None => self.git.status(&path).await,
        };
        let duration_ms = started_at.elapsed().as_millis() as u64;
        drop(permit);

        let note = match &result {
            Ok(_) => self.read_note(path).await,
            Err(_) => None,
        };

        self.apply_refresh(
            id,
            RefreshJob {
                generation,
                force,
                fetched,
                duration_ms,
                queue_delay_ms,
            },
            result,
            note,
        )
    }

    /// Read the worktree's note off the async workers
    async fn read_note(&self, path: PathBuf) -> Option<AiNote> {
        let notes = self.notes.clone();
        match self
            .runtime()
            .spawn_blocking(move || notes.read(&path))
            .await
        {
            Ok(note) => note,
            Err(e) => {
                warn!(error = %e, "Note reader task failed");
                None
            }
        }
    }

    /// Refresh every running monitor concurrently (bounded by the queue)
    pub async fn refresh_all(&self, force: bool) -> Vec<(String, RefreshOutcome)> {
        let ids = self.registry.lock().ids();
        let outcomes = join_all(ids.iter().map(|id| self.refresh_monitor(id, force))).await;
        ids.into_iter().zip(outcomes).collect()
    }

    fn is_generation_current(&self, id: &str, generation: u64) -> bool {
        self.registry
            .lock()
            .get(id)
            .is_some_and(|m| m.is_running && m.generation == generation)
    }

    /// Fold a status result into the monitor and schedule what comes next
    fn apply_refresh(
        &self,
        id: &str,
        job: RefreshJob,
        result: Result<GitStatus, GitError>,
        note: Option<AiNote>,
    ) -> RefreshOutcome {
        let RefreshJob {
            generation,
            force,
            fetched,
            duration_ms,
            queue_delay_ms,
        } = job;
        let mut reg = self.registry.lock();
        let config = reg.config;
        let main_branch = reg.main_branch.clone();
        let Some(m) = reg.get_mut(id) else {
            return RefreshOutcome::NotFound;
        };
        if m.generation != generation || !m.is_running {
            return RefreshOutcome::NotRunning;
        }

        m.is_updating = false;
        m.last_git_status_completed_at = Some(Instant::now());

        let (outcome, followup) = match result {
            Ok(status) => {
                // Results that raced a watcher event are not cached
                if fetched && !m.git_watch_refresh_pending {
                    self.status_cache.insert(m.path(), status.clone());
                }
                m.strategy.record_success(duration_ms, queue_delay_ms);
                cancel_timer(&mut m.breaker_timer);
                let emitted = self.apply_status(m, status, note, &main_branch, force);
                self.schedule_next_poll(m);
                let outcome = if emitted {
                    RefreshOutcome::Updated
                } else {
                    RefreshOutcome::Unchanged
                };
                (outcome, Followup::Keep)
            }
            Err(GitError::IndexLocked { .. }) => {
                // Another git process owns the index; retry once it settles
                debug!(worktree_id = %id, "Index locked, deferring refresh");
                m.git_watch_refresh_pending = true;
                if m.strategy.is_circuit_breaker_tripped() {
                    // Only a forced probe can close the breaker
                    self.schedule_breaker_retry(m, &config);
                } else {
                    self.schedule_next_poll(m);
                }
                (RefreshOutcome::Deferred, Followup::Keep)
            }
            Err(GitError::WorktreeRemoved { .. }) if !m.worktree.is_main_worktree => {
                info!(worktree_id = %id, "Worktree directory removed");
                (RefreshOutcome::Removed, Followup::Remove)
            }
            Err(e) => {
                self.apply_failure(m, &e, &main_branch, duration_ms, queue_delay_ms, &config);
                (RefreshOutcome::Failed, Followup::Keep)
            }
        };

        match followup {
            Followup::Keep => {
                if m.git_watch_refresh_pending {
                    self.schedule_debounced_refresh(m, config.git_watch_debounce_ms);
                }
                outcome
            }
            Followup::Remove => {
                let watcher = match reg.remove(id) {
                    Ok(mut removed) => {
                        if reg.active_worktree_id.as_deref() == Some(id) {
                            reg.active_worktree_id = None;
                        }
                        self.status_cache.invalidate(removed.path());
                        self.emitter.emit_removed(id);
                        removed.stop()
                    }
                    Err(_) => None,
                };
                drop(reg);
                if let Some(root) = self.project_root() {
                    self.discovery.invalidate(&root);
                }
                dispose_watchers(watcher);
                outcome
            }
        }
    }

    /// Apply a successful status. Returns true if a snapshot was emitted.
    ///
    /// Emits on the first status, on a forced refresh, or when the
    /// fingerprint changed.
    fn apply_status(
        &self,
        m: &mut MonitorState,
        status: GitStatus,
        note: Option<AiNote>,
        main_branch: &str,
        force: bool,
    ) -> bool {
        let mood = self.mood.classify(&m.worktree, Some(&status), main_branch);
        let summary = summarize(&status);
        let hash = state_fingerprint(Some(&status), mood, &summary, note.as_ref());
        let first = !m.has_initial_status;
        let now = chrono::Utc::now().timestamp_millis();

        let changes_differ = m
            .changes
            .as_ref()
            .is_none_or(|previous| previous.changes != status.changes);
        if first {
            m.last_activity_timestamp = if status.changes.is_empty() {
                status.last_commit_timestamp_ms
            } else {
                Some(now)
            };
        } else if changes_differ {
            m.last_activity_timestamp = Some(now);
        }

        m.modified_count = status.changed_file_count;
        m.mood = mood;
        m.summary = summary;
        m.ai_note = note;
        m.changes = Some(status);
        m.has_initial_status = true;

        if !first && !force && hash == m.previous_state_hash {
            return false;
        }
        m.previous_state_hash = hash;
        m.updated_at = now;
        self.emit_snapshot(m);
        true
    }

    fn apply_failure(
        &self,
        m: &mut MonitorState,
        error: &GitError,
        main_branch: &str,
        duration_ms: u64,
        queue_delay_ms: u64,
        config: &EffectiveConfig,
    ) {
        let tripped_now = m.strategy.record_failure(duration_ms, queue_delay_ms);
        let mood = self.mood.classify(&m.worktree, None, main_branch);
        let summary = match error {
            GitError::WorktreeRemoved { .. } => MAIN_MISSING_SUMMARY.to_string(),
            other => format!("Status check failed: {}", other),
        };
        warn!(
            worktree_id = %m.id(),
            failures = m.strategy.consecutive_failures(),
            error = %error,
            "Status check failed"
        );

        let hash = state_fingerprint(None, mood, &summary, None);
        m.mood = mood;
        m.summary = summary;
        m.has_initial_status = true;
        if hash != m.previous_state_hash {
            m.previous_state_hash = hash;
            m.updated_at = chrono::Utc::now().timestamp_millis();
            self.emit_snapshot(m);
        }

        if tripped_now {
            warn!(
                worktree_id = %m.id(),
                threshold = config.circuit_breaker_threshold,
                "Circuit breaker tripped, suspending polling"
            );
        }
        if m.strategy.is_circuit_breaker_tripped() {
            cancel_timer(&mut m.poll_timer);
            self.schedule_breaker_retry(m, config);
        } else {
            self.schedule_next_poll(m);
        }
    }

    // =========================================================
    // Scheduling
    // =========================================================

    /// Replace the poll timer with one for the next interval.
    ///
    /// No timer is scheduled while the monitor is stopped, polling is off or
    /// the circuit breaker is open.
    pub(crate) fn schedule_next_poll(&self, m: &mut MonitorState) {
        cancel_timer(&mut m.poll_timer);
        if !m.is_running || !m.polling_enabled || m.strategy.is_circuit_breaker_tripped() {
            return;
        }
        let base = if m.has_watcher() {
            GIT_WATCH_SAFETY_NET_INTERVAL_MS
        } else {
            m.strategy.calculate_next_interval()
        };
        let delay_ms = base + jitter(POLL_JITTER_MAX_MS);
        debug!(worktree_id = %m.id(), interval_ms = delay_ms, "Scheduling next poll");
        m.poll_timer = Some(self.spawn_timer(m.id(), TimerKind::Poll, Duration::from_millis(delay_ms)));
    }

    /// Replace the breaker timer with a forced probe after the cooldown
    fn schedule_breaker_retry(&self, m: &mut MonitorState, config: &EffectiveConfig) {
        cancel_timer(&mut m.breaker_timer);
        if !m.is_running {
            return;
        }
        let delay_ms = config.circuit_breaker_cooldown() + jitter(CIRCUIT_BREAKER_JITTER_MAX_MS);
        debug!(worktree_id = %m.id(), interval_ms = delay_ms, "Scheduling circuit breaker probe");
        m.breaker_timer =
            Some(self.spawn_timer(m.id(), TimerKind::Breaker, Duration::from_millis(delay_ms)));
    }

    /// Replace the debounce timer so a refresh runs after `debounce_ms`
    pub(crate) fn schedule_debounced_refresh(&self, m: &mut MonitorState, debounce_ms: u64) {
        cancel_timer(&mut m.git_watch_debounce_timer);
        if !m.is_running {
            return;
        }
        m.git_watch_debounce_timer = Some(self.spawn_timer(
            m.id(),
            TimerKind::Debounce,
            Duration::from_millis(debounce_ms),
        ));
    }
}
