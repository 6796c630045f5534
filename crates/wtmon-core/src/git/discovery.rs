//! TTL cache with in-flight request coalescing around worktree discovery.
//!
//! Listing worktrees shells out to git and several independent callers
//! (initial load, explicit refresh, worktree create/delete) tend to ask at
//! nearly the same moment. Callers for the same key inside the TTL window get
//! the cached list; callers that arrive while a fetch is running await that
//! same fetch instead of starting another one.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::debug;

use super::{GitError, Worktree};

/// Default TTL for a discovered worktree list
const DEFAULT_DISCOVERY_TTL: Duration = Duration::from_secs(5);

/// A discovery call that any number of callers can await
pub type DiscoveryFuture = Shared<BoxFuture<'static, Result<Vec<Worktree>, GitError>>>;

struct CachedList {
    worktrees: Vec<Worktree>,
    fetched_at: Instant,
}

#[derive(Default)]
struct DiscoveryState {
    entries: HashMap<PathBuf, CachedList>,
    in_flight: HashMap<PathBuf, DiscoveryFuture>,
}

/// Discovery cache keyed by canonical project root
pub struct WorktreeDiscoveryCache {
    ttl: Duration,
    state: Mutex<DiscoveryState>,
}

impl Default for WorktreeDiscoveryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl WorktreeDiscoveryCache {
    /// Create a cache with the default 5 second TTL
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_DISCOVERY_TTL)
    }

    /// Create a cache with a custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(DiscoveryState::default()),
        }
    }

    /// Canonical cache key for a project root.
    ///
    /// Falls back to the path as given when it cannot be resolved.
    pub fn canonical_key(root: &Path) -> PathBuf {
        root.canonicalize().unwrap_or_else(|_| root.to_path_buf())
    }

    /// Return the worktree list for `key`, calling `fetch` only when needed.
    ///
    /// `force_refresh` bypasses the TTL entry but still joins a fetch that is
    /// already in flight.
    pub async fn list_with<F, Fut>(
        &self,
        key: &Path,
        force_refresh: bool,
        fetch: F,
    ) -> Result<Vec<Worktree>, GitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Worktree>, GitError>> + Send + 'static,
    {
        let future = {
            let mut state = self.state.lock();

            if !force_refresh {
                if let Some(entry) = state.entries.get(key) {
                    if entry.fetched_at.elapsed() < self.ttl {
                        return Ok(entry.worktrees.clone());
                    }
                }
            }

            match state.in_flight.get(key) {
                Some(existing) => {
                    debug!(key = %key.display(), "Joining in-flight worktree discovery");
                    existing.clone()
                }
                None => {
                    let shared = fetch().boxed().shared();
                    state.in_flight.insert(key.to_path_buf(), shared.clone());
                    shared
                }
            }
        };

        let result = future.clone().await;

        // Only the tracker that is still registered may populate the cache; an
        // invalidation in the meantime removed or replaced it.
        let mut state = self.state.lock();
        let still_current = state
            .in_flight
            .get(key)
            .is_some_and(|current| current.ptr_eq(&future));
        if still_current {
            state.in_flight.remove(key);
            if let Ok(worktrees) = &result {
                state.entries.insert(
                    key.to_path_buf(),
                    CachedList {
                        worktrees: worktrees.clone(),
                        fetched_at: Instant::now(),
                    },
                );
            }
        }

        result
    }

    /// Cached list for `key` if still fresh, without fetching
    pub fn get_cached(&self, key: &Path) -> Option<Vec<Worktree>> {
        let state = self.state.lock();
        state
            .entries
            .get(key)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.worktrees.clone())
    }

    /// Drop the cached entry for `key`
    pub fn invalidate_entry(&self, key: &Path) {
        self.state.lock().entries.remove(key);
    }

    /// Forget the in-flight tracker for `key`; its result will not be cached
    pub fn invalidate_in_flight(&self, key: &Path) {
        self.state.lock().in_flight.remove(key);
    }

    /// Drop both the entry and the in-flight tracker for `key`
    pub fn invalidate(&self, key: &Path) {
        let mut state = self.state.lock();
        state.entries.remove(key);
        state.in_flight.remove(key);
    }

    /// Forget everything (project switch)
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.in_flight.clear();
    }

    /// Whether a fetch is currently running for `key`
    pub fn is_in_flight(&self, key: &Path) -> bool {
        self.state.lock().in_flight.contains_key(key)
    }
}
