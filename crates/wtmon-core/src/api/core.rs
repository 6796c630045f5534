//! WorktreeMonitor: the Facade entry-point for consumers (CLI, UI bridge).
//!
//! It owns the engine and exposes typed query/action methods; callers never
//! touch the registry lock or wire collaborators themselves.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::MonitorConfig;
use crate::git::{GitBackend, GitCli};
use crate::monitor::Engine;

use super::events::{ProjectEvent, SystemEvent};

/// The Facade over the monitoring engine.
///
/// Constructed via [`WorktreeMonitorBuilder`](super::builder::WorktreeMonitorBuilder).
pub struct WorktreeMonitor<G: GitBackend = GitCli> {
    engine: Arc<Engine<G>>,
    /// Config merged into the engine on every project load
    config: MonitorConfig,
}

impl<G: GitBackend> WorktreeMonitor<G> {
    /// Create a new instance (prefer `WorktreeMonitorBuilder`)
    pub(crate) fn new(engine: Arc<Engine<G>>, config: MonitorConfig) -> Self {
        Self { engine, config }
    }

    /// Subscribe to project-scoped events (`worktree-update`, `worktree-removed`)
    pub fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.engine.emitter().subscribe()
    }

    /// Subscribe to project-agnostic events for enrichment collaborators
    pub fn subscribe_system(&self) -> broadcast::Receiver<SystemEvent> {
        self.engine.emitter().subscribe_system()
    }

    /// Canonical root of the loaded project, if any
    pub fn project_root(&self) -> Option<PathBuf> {
        self.engine.project_root()
    }

    /// Config applied on project load
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Access the engine directly.
    ///
    /// Prefer the query/action methods; this exists for collaborators that
    /// drive reconciliation themselves.
    pub fn engine(&self) -> &Arc<Engine<G>> {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::WorktreeMonitorBuilder;

    #[tokio::test]
    async fn test_monitor_creation() {
        let config = MonitorConfig {
            poll_interval_active: Some(1_500),
            ..Default::default()
        };
        let monitor = WorktreeMonitorBuilder::new().with_config(config.clone()).build();

        assert_eq!(monitor.config(), &config);
        assert!(monitor.project_root().is_none());
        assert_eq!(monitor.engine().monitor_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_receives_removal() {
        let monitor = WorktreeMonitorBuilder::new().build();
        let mut rx = monitor.subscribe();
        let mut sys = monitor.subscribe_system();

        monitor.engine().emitter().emit_removed("/repo-a");

        assert_eq!(rx.recv().await.unwrap().worktree_id(), "/repo-a");
        assert!(matches!(
            sys.recv().await.unwrap(),
            SystemEvent::WorktreeRemoved { .. }
        ));
    }
}
