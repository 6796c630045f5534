use std::collections::HashMap;

use super::state::MonitorState;
use crate::config::EffectiveConfig;

/// Why a monitor could not be taken out of the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalRefused {
    /// The main worktree is always monitored
    MainWorktree,
    NotFound,
}

/// worktree id -> monitor, plus the project-wide scope the monitors share.
///
/// The key set only changes through [`insert`](Self::insert) and
/// [`remove`](Self::remove).
#[derive(Default)]
pub struct MonitorRegistry {
    monitors: HashMap<String, MonitorState>,
    /// Resolved configuration every monitor is kept in line with
    pub config: EffectiveConfig,
    /// Branch considered "main" for mood classification
    pub main_branch: String,
    /// Worktree the user is currently looking at
    pub active_worktree_id: Option<String>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self {
            main_branch: "main".to_string(),
            ..Default::default()
        }
    }

    pub fn get(&self, id: &str) -> Option<&MonitorState> {
        self.monitors.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut MonitorState> {
        self.monitors.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.monitors.contains_key(id)
    }

    /// Track a new monitor. Returns false (and keeps the existing one) if the
    /// id is already tracked.
    pub fn insert(&mut self, monitor: MonitorState) -> bool {
        let id = monitor.id().to_string();
        if self.monitors.contains_key(&id) {
            return false;
        }
        self.monitors.insert(id, monitor);
        true
    }

    /// Take a monitor out of the registry. The main worktree is refused.
    pub fn remove(&mut self, id: &str) -> Result<MonitorState, RemovalRefused> {
        match self.monitors.get(id) {
            None => Err(RemovalRefused::NotFound),
            Some(m) if m.worktree.is_main_worktree => Err(RemovalRefused::MainWorktree),
            Some(_) => self.monitors.remove(id).ok_or(RemovalRefused::NotFound),
        }
    }

    /// Remove every monitor, main included (project teardown only)
    pub fn drain_all(&mut self) -> Vec<MonitorState> {
        self.active_worktree_id = None;
        self.monitors.drain().map(|(_, m)| m).collect()
    }

    /// Tracked ids, sorted for stable iteration
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.monitors.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &MonitorState> {
        self.monitors.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MonitorState> {
        self.monitors.values_mut()
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    /// Id of the main worktree's monitor, if tracked
    pub fn main_worktree_id(&self) -> Option<&str> {
        self.monitors
            .values()
            .find(|m| m.worktree.is_main_worktree)
            .map(|m| m.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::Worktree;

    fn monitor(path: &str, main: bool) -> MonitorState {
        MonitorState::new(
            Worktree::new(path, Some("b".into()), main),
            false,
            &EffectiveConfig::default(),
        )
    }

    #[test]
    fn test_insert_is_unique() {
        let mut reg = MonitorRegistry::new();
        assert!(reg.insert(monitor("/a", false)));
        assert!(!reg.insert(monitor("/a", false)));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_main_worktree_cannot_be_removed() {
        let mut reg = MonitorRegistry::new();
        reg.insert(monitor("/main", true));
        reg.insert(monitor("/feature", false));
        assert_eq!(reg.remove("/main").err(), Some(RemovalRefused::MainWorktree));
        assert!(reg.remove("/feature").is_ok());
        assert_eq!(reg.remove("/feature").err(), Some(RemovalRefused::NotFound));
        assert_eq!(reg.ids(), vec!["/main".to_string()]);
        assert_eq!(reg.main_worktree_id(), Some("/main"));
    }

    #[test]
    fn test_drain_all_includes_main() {
        let mut reg = MonitorRegistry::new();
        reg.insert(monitor("/main", true));
        reg.insert(monitor("/feature", false));
        reg.active_worktree_id = Some("/main".into());
        assert_eq!(reg.drain_all().len(), 2);
        assert!(reg.is_empty());
        assert!(reg.active_worktree_id.is_none());
    }
}
