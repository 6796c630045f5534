//! Builder for constructing a [`WorktreeMonitor`] instance.
//!
//! ```ignore
//! let monitor = WorktreeMonitorBuilder::new()
//!     .with_config(config)
//!     .with_note_reader(Arc::new(FileNoteReader::default()))
//!     .with_max_concurrent_refreshes(4)
//!     .build();
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::config::MonitorConfig;
use crate::git::{
    BranchIssueExtractor, GitBackend, GitCli, IssueExtractor, StatusCache, WorktreeDiscoveryCache,
};
use crate::monitor::{Engine, EngineParts, RefreshQueue, DEFAULT_MAX_CONCURRENT_REFRESHES};
use crate::mood::{DefaultMoodClassifier, MoodClassifier};
use crate::notes::{NoNotes, NoteReader};
use crate::watcher::{NotifyWatcherFactory, WatcherFactory};

use super::core::WorktreeMonitor;
use super::events::SnapshotEmitter;

/// Builder for constructing a [`WorktreeMonitor`] Facade instance
pub struct WorktreeMonitorBuilder<G: GitBackend = GitCli> {
    git: Arc<G>,
    mood: Option<Arc<dyn MoodClassifier>>,
    issues: Option<Arc<dyn IssueExtractor>>,
    notes: Option<Arc<dyn NoteReader>>,
    watchers: Option<Arc<dyn WatcherFactory>>,
    config: MonitorConfig,
    max_concurrent_refreshes: usize,
    discovery_ttl: Option<Duration>,
    status_cache_ttl: Option<Duration>,
    runtime: Option<Handle>,
}

impl Default for WorktreeMonitorBuilder<GitCli> {
    fn default() -> Self {
        Self::new()
    }
}

impl WorktreeMonitorBuilder<GitCli> {
    /// Create a builder backed by the `git` executable
    pub fn new() -> Self {
        Self::with_git(GitCli::new())
    }
}

impl<G: GitBackend> WorktreeMonitorBuilder<G> {
    /// Create a builder around a custom git backend
    pub fn with_git(git: G) -> Self {
        Self::from_shared_git(Arc::new(git))
    }

    /// Create a builder from an already-shared git backend
    pub fn from_shared_git(git: Arc<G>) -> Self {
        Self {
            git,
            mood: None,
            issues: None,
            notes: None,
            watchers: None,
            config: MonitorConfig::default(),
            max_concurrent_refreshes: DEFAULT_MAX_CONCURRENT_REFRESHES,
            discovery_ttl: None,
            status_cache_ttl: None,
            runtime: None,
        }
    }

    pub fn with_mood_classifier(mut self, mood: Arc<dyn MoodClassifier>) -> Self {
        self.mood = Some(mood);
        self
    }

    pub fn with_issue_extractor(mut self, issues: Arc<dyn IssueExtractor>) -> Self {
        self.issues = Some(issues);
        self
    }

    pub fn with_note_reader(mut self, notes: Arc<dyn NoteReader>) -> Self {
        self.notes = Some(notes);
        self
    }

    pub fn with_watcher_factory(mut self, watchers: Arc<dyn WatcherFactory>) -> Self {
        self.watchers = Some(watchers);
        self
    }

    /// Monitor config applied on every project load
    pub fn with_config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    /// Upper bound on status refreshes running at once
    pub fn with_max_concurrent_refreshes(mut self, max: usize) -> Self {
        self.max_concurrent_refreshes = max;
        self
    }

    pub fn with_discovery_ttl(mut self, ttl: Duration) -> Self {
        self.discovery_ttl = Some(ttl);
        self
    }

    pub fn with_status_cache_ttl(mut self, ttl: Duration) -> Self {
        self.status_cache_ttl = Some(ttl);
        self
    }

    /// Runtime that timers and watcher callbacks are spawned onto
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the `WorktreeMonitor` instance.
    ///
    /// Unset collaborators fall back to the defaults (default mood heuristic,
    /// branch-name issue extraction, no notes, `notify` watchers). Without
    /// [`with_runtime`](Self::with_runtime) this must be called from within a
    /// tokio runtime.
    pub fn build(self) -> WorktreeMonitor<G> {
        let runtime = self.runtime.unwrap_or_else(Handle::current);
        let status_cache = match self.status_cache_ttl {
            Some(ttl) => StatusCache::with_ttl(ttl),
            None => StatusCache::new(),
        };
        let discovery = match self.discovery_ttl {
            Some(ttl) => WorktreeDiscoveryCache::with_ttl(ttl),
            None => WorktreeDiscoveryCache::new(),
        };

        let engine = Engine::new(EngineParts {
            git: self.git,
            mood: self.mood.unwrap_or_else(|| Arc::new(DefaultMoodClassifier)),
            issues: self
                .issues
                .unwrap_or_else(|| Arc::new(BranchIssueExtractor)),
            notes: self.notes.unwrap_or_else(|| Arc::new(NoNotes)),
            watchers: self
                .watchers
                .unwrap_or_else(|| Arc::new(NotifyWatcherFactory)),
            status_cache,
            discovery,
            queue: RefreshQueue::new(self.max_concurrent_refreshes),
            emitter: SnapshotEmitter::new(),
            runtime,
        });

        WorktreeMonitor::new(engine, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builder_defaults() {
        let monitor = WorktreeMonitorBuilder::new().build();
        assert_eq!(monitor.config(), &MonitorConfig::default());
        assert_eq!(
            monitor.engine().queue.capacity(),
            DEFAULT_MAX_CONCURRENT_REFRESHES
        );
    }

    #[tokio::test]
    async fn test_builder_tunables() {
        let monitor = WorktreeMonitorBuilder::new()
            .with_max_concurrent_refreshes(5)
            .with_discovery_ttl(Duration::from_millis(50))
            .with_status_cache_ttl(Duration::ZERO)
            .with_note_reader(Arc::new(NoNotes))
            .build();
        assert_eq!(monitor.engine().queue.capacity(), 5);
    }

    #[test]
    fn test_builder_with_explicit_runtime() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        // Built outside any runtime context
        let monitor = WorktreeMonitorBuilder::new()
            .with_runtime(rt.handle().clone())
            .build();
        assert!(monitor.project_root().is_none());
    }
}
