//! Worktree mood: a coarse health classification shown next to each worktree.

use chrono::Utc;
use serde::Serialize;

use crate::git::{GitStatus, Worktree};

/// Days without a commit after which an unchanged worktree counts as stale
const STALE_AFTER_DAYS: i64 = 7;

/// Coarse worktree health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    /// Nothing uncommitted
    #[default]
    Stable,
    /// Uncommitted work in progress
    Active,
    /// No recent commits and nothing in progress
    Stale,
    /// Status could not be determined
    Error,
}

impl Mood {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Stable => "stable",
            Mood::Active => "active",
            Mood::Stale => "stale",
            Mood::Error => "error",
        }
    }
}

/// Classifies a worktree from its latest change set.
///
/// `changes` is `None` when the status fetch failed.
pub trait MoodClassifier: Send + Sync {
    fn classify(&self, worktree: &Worktree, changes: Option<&GitStatus>, main_branch: &str)
        -> Mood;
}

/// Default heuristic based on change count and commit age
#[derive(Debug, Clone, Default)]
pub struct DefaultMoodClassifier;

impl MoodClassifier for DefaultMoodClassifier {
    fn classify(
        &self,
        worktree: &Worktree,
        changes: Option<&GitStatus>,
        main_branch: &str,
    ) -> Mood {
        let Some(status) = changes else {
            return Mood::Error;
        };
        if status.changed_file_count > 0 {
            return Mood::Active;
        }
        // The main branch is expected to sit idle between merges
        let on_main = worktree.branch.as_deref() == Some(main_branch);
        if !on_main {
            if let Some(ts) = status.last_commit_timestamp_ms {
                let age_days = (Utc::now().timestamp_millis() - ts) / 86_400_000;
                if age_days >= STALE_AFTER_DAYS {
                    return Mood::Stale;
                }
            }
        }
        Mood::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worktree(branch: &str) -> Worktree {
        Worktree::new("/repo-feature", Some(branch.to_string()), false)
    }

    fn days_ago(days: i64) -> Option<i64> {
        Some(Utc::now().timestamp_millis() - days * 86_400_000)
    }

    #[test]
    fn test_failed_status_is_error() {
        let mood = DefaultMoodClassifier.classify(&worktree("feature"), None, "main");
        assert_eq!(mood, Mood::Error);
    }

    #[test]
    fn test_changes_are_active() {
        let status = GitStatus {
            changed_file_count: 2,
            ..Default::default()
        };
        let mood = DefaultMoodClassifier.classify(&worktree("feature"), Some(&status), "main");
        assert_eq!(mood, Mood::Active);
    }

    #[test]
    fn test_old_feature_branch_is_stale() {
        let status = GitStatus {
            last_commit_timestamp_ms: days_ago(30),
            ..Default::default()
        };
        let mood = DefaultMoodClassifier.classify(&worktree("feature"), Some(&status), "main");
        assert_eq!(mood, Mood::Stale);
    }

    #[test]
    fn test_old_main_branch_is_stable() {
        let status = GitStatus {
            last_commit_timestamp_ms: days_ago(30),
            ..Default::default()
        };
        let mood = DefaultMoodClassifier.classify(&worktree("main"), Some(&status), "main");
        assert_eq!(mood, Mood::Stable);
    }

    #[test]
    fn test_recent_clean_is_stable() {
        let status = GitStatus {
            last_commit_timestamp_ms: days_ago(1),
            ..Default::default()
        };
        let mood = DefaultMoodClassifier.classify(&worktree("feature"), Some(&status), "main");
        assert_eq!(mood, Mood::Stable);
    }
}
