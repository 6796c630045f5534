//! Snapshot event channels.
//!
//! Two distinct streams:
//! - **Project events** carry the project key and are what a UI subscribes to.
//! - **System events** are project-agnostic signals for enrichment
//!   collaborators (PR and issue detectors) that only need to know that a
//!   worktree changed.
//!
//! Sending never blocks; if nobody is subscribed the event is dropped.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use super::types::WorktreeSnapshot;

/// Default broadcast channel capacity
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events scoped to the loaded project
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProjectEvent {
    /// A worktree's snapshot changed
    WorktreeUpdate {
        project: String,
        worktree: WorktreeSnapshot,
    },
    /// A worktree stopped being monitored
    WorktreeRemoved { project: String, id: String },
}

impl ProjectEvent {
    /// Id of the worktree the event is about
    pub fn worktree_id(&self) -> &str {
        match self {
            ProjectEvent::WorktreeUpdate { worktree, .. } => &worktree.id,
            ProjectEvent::WorktreeRemoved { id, .. } => id,
        }
    }
}

/// Project-agnostic events for cross-cutting collaborators
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SystemEvent {
    WorktreeUpdated {
        id: String,
        path: String,
        branch: Option<String>,
        issue_number: Option<u64>,
        pr_number: Option<u64>,
    },
    WorktreeRemoved {
        id: String,
    },
}

/// Publishes snapshots on both channels
pub struct SnapshotEmitter {
    project: RwLock<String>,
    project_tx: broadcast::Sender<ProjectEvent>,
    system_tx: broadcast::Sender<SystemEvent>,
}

impl Default for SnapshotEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotEmitter {
    pub fn new() -> Self {
        let (project_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (system_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            project: RwLock::new(String::new()),
            project_tx,
            system_tx,
        }
    }

    /// Label attached to project events
    pub fn set_project(&self, project: &str) {
        *self.project.write() = project.to_string();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.project_tx.subscribe()
    }

    pub fn subscribe_system(&self) -> broadcast::Receiver<SystemEvent> {
        self.system_tx.subscribe()
    }

    /// Publish a worktree update on both channels
    pub fn emit_update(&self, snapshot: WorktreeSnapshot) {
        let system = SystemEvent::WorktreeUpdated {
            id: snapshot.id.clone(),
            path: snapshot.path.clone(),
            branch: snapshot.branch.clone(),
            issue_number: snapshot.issue_number,
            pr_number: snapshot.pr_number,
        };
        let project = self.project.read().clone();
        let _ = self.project_tx.send(ProjectEvent::WorktreeUpdate {
            project,
            worktree: snapshot,
        });
        let _ = self.system_tx.send(system);
    }

    /// Publish a removal on both channels
    pub fn emit_removed(&self, id: &str) {
        let project = self.project.read().clone();
        let _ = self.project_tx.send(ProjectEvent::WorktreeRemoved {
            project,
            id: id.to_string(),
        });
        let _ = self.system_tx.send(SystemEvent::WorktreeRemoved { id: id.to_string() });
    }
}
