use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::GitStatus;

/// Default TTL for cached status results
const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(1);

/// Per-path cache of the most recent [`GitStatus`] with a TTL.
///
/// Shared by every monitor; entries are only ever invalidated per path, except
/// for [`StatusCache::clear`] during project teardown.
pub struct StatusCache {
    cache: Mutex<HashMap<PathBuf, (GitStatus, Instant)>>,
    ttl: Duration,
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCache {
    /// Create a new StatusCache with default TTL of 1 second
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_STATUS_TTL)
    }

    /// Create a cache with a custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Get a cached status. Returns None if missing or expired.
    pub fn get(&self, path: &Path) -> Option<GitStatus> {
        let cache = self.cache.lock();
        match cache.get(path) {
            Some((status, ts)) if ts.elapsed() < self.ttl => Some(status.clone()),
            _ => None,
        }
    }

    /// Store a fresh status for `path`
    pub fn insert(&self, path: &Path, status: GitStatus) {
        self.cache
            .lock()
            .insert(path.to_path_buf(), (status, Instant::now()));
    }

    /// Drop the entry for `path` so the next refresh goes to git
    pub fn invalidate(&self, path: &Path) {
        self.cache.lock().remove(path);
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(count: usize) -> GitStatus {
        GitStatus {
            changed_file_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn test_get_within_ttl() {
        let cache = StatusCache::with_ttl(Duration::from_secs(60));
        cache.insert(Path::new("/repo"), status(2));
        assert_eq!(cache.get(Path::new("/repo")).unwrap().changed_file_count, 2);
        assert!(cache.get(Path::new("/other")).is_none());
    }

    #[test]
    fn test_expired_entry_is_miss() {
        let cache = StatusCache::with_ttl(Duration::from_millis(0));
        cache.insert(Path::new("/repo"), status(1));
        assert!(cache.get(Path::new("/repo")).is_none());
    }

    #[test]
    fn test_invalidate_is_per_path() {
        let cache = StatusCache::with_ttl(Duration::from_secs(60));
        cache.insert(Path::new("/a"), status(1));
        cache.insert(Path::new("/b"), status(2));
        cache.invalidate(Path::new("/a"));
        assert!(cache.get(Path::new("/a")).is_none());
        assert!(cache.get(Path::new("/b")).is_some());
        cache.clear();
        assert!(cache.get(Path::new("/b")).is_none());
    }
}
