//! Registry reconciliation, activity tiers and collaborator enrichment.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{debug, warn};

use super::engine::{dispose_watchers, Engine};
use super::registry::RemovalRefused;
use super::state::MonitorState;
use crate::api::types::{ApiError, PrInfo, RefreshOutcome, SyncReport};
use crate::config::MonitorConfig;
use crate::git::{GitBackend, Worktree};
use crate::watcher::GitWatcher;

/// Options for one reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct SyncOptions<'a> {
    /// Worktree the user is looking at
    pub active_id: Option<&'a str>,
    /// Branch considered "main"; keeps the current one when `None`
    pub main_branch: Option<&'a str>,
    /// Partial config merged before monitors are updated
    pub config: Option<&'a MonitorConfig>,
    /// Leave new monitors without a status until `refresh_all` runs
    pub skip_initial_status: bool,
}

impl<G: GitBackend> Engine<G> {
    /// Bring the registry in line with a freshly discovered worktree list.
    ///
    /// The whole pass runs under one registry lock; watchers that get
    /// detached are disposed after it is released.
    pub fn sync_monitors(&self, worktrees: &[Worktree], opts: SyncOptions<'_>) -> SyncReport {
        let mut report = SyncReport::default();
        let mut detached: Vec<Box<dyn GitWatcher>> = Vec::new();
        let mut issue_lookups: Vec<(String, String, PathBuf)> = Vec::new();
        let mut initial_refresh: Vec<String> = Vec::new();

        {
            let mut reg = self.registry.lock();
            if let Some(config) = opts.config {
                reg.config.merge(config);
            }
            if let Some(branch) = opts.main_branch {
                reg.main_branch = branch.to_string();
            }
            reg.active_worktree_id = opts.active_id.map(str::to_string);
            let cfg = reg.config;

            let incoming: HashSet<&str> = worktrees.iter().map(|w| w.id.as_str()).collect();
            for id in reg.ids() {
                if incoming.contains(id.as_str()) {
                    continue;
                }
                match reg.remove(&id) {
                    Ok(mut m) => {
                        detached.extend(m.stop());
                        self.status_cache.invalidate(m.path());
                        self.emitter.emit_removed(&id);
                        report.removed.push(id);
                    }
                    Err(RemovalRefused::MainWorktree) => {
                        warn!(worktree_id = %id, "Main worktree missing from discovery, keeping its monitor");
                        report.refused.push(id);
                    }
                    Err(RemovalRefused::NotFound) => {}
                }
            }

            for wt in worktrees {
                let is_current = opts.active_id == Some(wt.id.as_str());

                let Some(m) = reg.get_mut(&wt.id) else {
                    let mut m = MonitorState::new(wt.clone(), is_current, &cfg);
                    m.issue_number = wt
                        .branch
                        .as_deref()
                        .and_then(|b| self.issues.extract_sync(b));
                    m.is_running = true;
                    m.polling_enabled = true;
                    detached.extend(self.attach_watcher(&mut m, cfg.git_watch_enabled));
                    self.schedule_next_poll(&mut m);
                    if let Some(branch) = &wt.branch {
                        issue_lookups.push((wt.id.clone(), branch.clone(), wt.path.clone()));
                    }
                    if !opts.skip_initial_status {
                        initial_refresh.push(wt.id.clone());
                    }
                    debug!(worktree_id = %wt.id, is_current, "Monitor created");
                    report.created.push(wt.id.clone());
                    reg.insert(m);
                    continue;
                };

                let was_current = m.is_current;
                let had_issue = m.issue_number.is_some();
                let name_changed = m.worktree.name != wt.name;
                m.worktree.name = wt.name.clone();
                m.worktree.head = wt.head.clone();
                m.is_current = is_current;
                let interval_changed = m.apply_config(&cfg);

                let branch_changed = m.worktree.branch != wt.branch;
                let watcher_toggled = !branch_changed && cfg.git_watch_enabled != m.watch_enabled;
                if branch_changed {
                    debug!(
                        worktree_id = %wt.id,
                        from = m.worktree.branch.as_deref().unwrap_or("(detached)"),
                        to = wt.branch.as_deref().unwrap_or("(detached)"),
                        "Branch changed"
                    );
                    m.worktree.branch = wt.branch.clone();
                    m.clear_enrichment();
                    m.issue_number = wt
                        .branch
                        .as_deref()
                        .and_then(|b| self.issues.extract_sync(b));
                    detached.extend(self.attach_watcher(m, cfg.git_watch_enabled));
                    if let Some(branch) = &wt.branch {
                        issue_lookups.push((wt.id.clone(), branch.clone(), wt.path.clone()));
                    }
                } else if watcher_toggled {
                    detached.extend(self.attach_watcher(m, cfg.git_watch_enabled));
                }

                if (interval_changed || branch_changed || watcher_toggled) && !m.is_updating {
                    self.schedule_next_poll(m);
                }

                let issue_arrived = !had_issue && m.issue_number.is_some();
                if (was_current != is_current || issue_arrived) && m.has_initial_status {
                    m.updated_at = chrono::Utc::now().timestamp_millis();
                    self.emit_snapshot(m);
                }

                if name_changed
                    || branch_changed
                    || watcher_toggled
                    || interval_changed
                    || was_current != is_current
                {
                    report.updated.push(wt.id.clone());
                }
            }
        }

        dispose_watchers(detached);
        for (id, branch, path) in issue_lookups {
            self.spawn_issue_extraction(id, branch, path);
        }
        for id in initial_refresh {
            let weak = self.weak();
            self.runtime().spawn(async move {
                if let Some(engine) = weak.upgrade() {
                    engine.refresh_monitor(&id, false).await;
                }
            });
        }

        debug!(
            created = report.created.len(),
            updated = report.updated.len(),
            removed = report.removed.len(),
            "Monitors reconciled"
        );
        report
    }

    /// Move the active tier to `id` (or clear it) and refresh the new
    /// active worktree right away.
    pub async fn set_active_worktree(&self, id: Option<&str>) -> Result<(), ApiError> {
        {
            let mut reg = self.registry.lock();
            if let Some(id) = id {
                if !reg.contains(id) {
                    return Err(ApiError::WorktreeNotFound { id: id.to_string() });
                }
            }
            reg.active_worktree_id = id.map(str::to_string);
            let cfg = reg.config;
            let now = chrono::Utc::now().timestamp_millis();

            for m in reg.iter_mut() {
                let is_current = Some(m.id()) == id;
                if m.is_current == is_current {
                    continue;
                }
                m.is_current = is_current;
                if m.apply_config(&cfg) && !m.is_updating {
                    self.schedule_next_poll(m);
                }
                if m.has_initial_status {
                    m.updated_at = now;
                    self.emit_snapshot(m);
                }
            }
        }

        if let Some(id) = id {
            let outcome = self.refresh_monitor(id, false).await;
            if outcome == RefreshOutcome::NotFound {
                return Err(ApiError::WorktreeNotFound { id: id.to_string() });
            }
        }
        Ok(())
    }

    // =========================================================
    // Enrichment
    // =========================================================

    /// Merge pull-request data from a PR detector; `None` clears it
    pub fn apply_pr_info(&self, id: &str, pr: Option<PrInfo>) -> Result<(), ApiError> {
        let mut reg = self.registry.lock();
        let m = reg
            .get_mut(id)
            .ok_or_else(|| ApiError::WorktreeNotFound { id: id.to_string() })?;

        let (number, url, state, title) = match pr {
            Some(pr) => (Some(pr.number), pr.url, pr.state, pr.title),
            None => (None, None, None, None),
        };
        if m.pr_number == number && m.pr_url == url && m.pr_state == state && m.pr_title == title {
            return Ok(());
        }
        m.pr_number = number;
        m.pr_url = url;
        m.pr_state = state;
        m.pr_title = title;
        m.updated_at = chrono::Utc::now().timestamp_millis();
        self.emit_snapshot(m);
        Ok(())
    }

    /// Attach an issue title. Ignored (returns false) when the monitor's
    /// issue number moved on in the meantime.
    pub fn apply_issue_title(
        &self,
        id: &str,
        issue_number: u64,
        title: Option<String>,
    ) -> Result<bool, ApiError> {
        let mut reg = self.registry.lock();
        let m = reg
            .get_mut(id)
            .ok_or_else(|| ApiError::WorktreeNotFound { id: id.to_string() })?;

        if m.issue_number != Some(issue_number) {
            return Ok(false);
        }
        if m.issue_title != title {
            m.issue_title = title;
            m.updated_at = chrono::Utc::now().timestamp_millis();
            self.emit_snapshot(m);
        }
        Ok(true)
    }

    /// Resolve the authoritative issue number for a branch in the background
    fn spawn_issue_extraction(&self, id: String, branch: String, path: PathBuf) {
        let weak = self.weak();
        self.runtime().spawn(async move {
            let Some(engine) = weak.upgrade() else {
                return;
            };
            let issue = engine.issues.extract(&branch, &path).await;
            engine.apply_extracted_issue(&id, &branch, issue);
        });
    }

    fn apply_extracted_issue(&self, id: &str, branch: &str, issue: Option<u64>) {
        let mut reg = self.registry.lock();
        let Some(m) = reg.get_mut(id) else {
            return;
        };
        // Branch switched again while the lookup ran
        if m.worktree.branch.as_deref() != Some(branch) || m.issue_number == issue {
            return;
        }
        debug!(worktree_id = %id, ?issue, "Issue number resolved");
        m.issue_number = issue;
        m.issue_title = None;
        if m.has_initial_status {
            m.updated_at = chrono::Utc::now().timestamp_millis();
            self.emit_snapshot(m);
        }
    }
}
