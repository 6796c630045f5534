//! Monitor configuration.
//!
//! [`MonitorConfig`] is the partial, caller-supplied form (every field optional,
//! last write wins). It is folded onto [`EffectiveConfig`], which always holds a
//! concrete value for every knob.

use serde::{Deserialize, Serialize};

/// Poll interval for the worktree the user is currently looking at
pub const DEFAULT_POLL_INTERVAL_ACTIVE_MS: u64 = 2_000;
/// Poll interval for every other worktree
pub const DEFAULT_POLL_INTERVAL_BACKGROUND_MS: u64 = 10_000;
/// Ceiling for adaptive backoff
pub const DEFAULT_POLL_INTERVAL_MAX_MS: u64 = 30_000;
/// Consecutive failures before the circuit breaker trips
pub const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 3;
/// Delay used to coalesce bursts of watcher events
pub const DEFAULT_GIT_WATCH_DEBOUNCE_MS: u64 = 300;

/// Watcher callbacks this soon after our own refresh are assumed to be caused by it
pub const GIT_WATCH_SELF_TRIGGER_COOLDOWN_MS: u64 = 1_000;
/// Timer interval while a watcher is the primary trigger
pub const GIT_WATCH_SAFETY_NET_INTERVAL_MS: u64 = 60_000;
/// Lower bound for the circuit-breaker probe delay
pub const CIRCUIT_BREAKER_MIN_COOLDOWN_MS: u64 = 30_000;
/// Upper bound of the random jitter added to a normal poll
pub const POLL_JITTER_MAX_MS: u64 = 500;
/// Upper bound of the random jitter added to a circuit-breaker probe
pub const CIRCUIT_BREAKER_JITTER_MAX_MS: u64 = 5_000;

/// Minimum accepted value for any poll interval
const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Partial monitor configuration supplied on reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Poll interval for the active worktree (ms)
    #[serde(default)]
    pub poll_interval_active: Option<u64>,
    /// Poll interval for background worktrees (ms)
    #[serde(default)]
    pub poll_interval_background: Option<u64>,
    /// Grow the interval on failures and slow polls
    #[serde(default)]
    pub adaptive_backoff: Option<bool>,
    /// Adaptive backoff ceiling (ms)
    #[serde(default)]
    pub poll_interval_max: Option<u64>,
    /// Consecutive failures before polling is suspended
    #[serde(default)]
    pub circuit_breaker_threshold: Option<u32>,
    /// Use filesystem watchers as the primary refresh trigger
    #[serde(default)]
    pub git_watch_enabled: Option<bool>,
    /// Debounce for watcher-triggered refreshes (ms)
    #[serde(default)]
    pub git_watch_debounce_ms: Option<u64>,
}

/// Fully resolved monitor configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    pub poll_interval_active: u64,
    pub poll_interval_background: u64,
    pub adaptive_backoff: bool,
    pub poll_interval_max: u64,
    pub circuit_breaker_threshold: u32,
    pub git_watch_enabled: bool,
    pub git_watch_debounce_ms: u64,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            poll_interval_active: DEFAULT_POLL_INTERVAL_ACTIVE_MS,
            poll_interval_background: DEFAULT_POLL_INTERVAL_BACKGROUND_MS,
            adaptive_backoff: true,
            poll_interval_max: DEFAULT_POLL_INTERVAL_MAX_MS,
            circuit_breaker_threshold: DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            git_watch_enabled: true,
            git_watch_debounce_ms: DEFAULT_GIT_WATCH_DEBOUNCE_MS,
        }
    }
}

impl EffectiveConfig {
    /// Overlay the fields present in `config` (last write wins)
    pub fn merge(&mut self, config: &MonitorConfig) {
        if let Some(v) = config.poll_interval_active {
            self.poll_interval_active = v;
        }
        if let Some(v) = config.poll_interval_background {
            self.poll_interval_background = v;
        }
        if let Some(v) = config.adaptive_backoff {
            self.adaptive_backoff = v;
        }
        if let Some(v) = config.poll_interval_max {
            self.poll_interval_max = v;
        }
        if let Some(v) = config.circuit_breaker_threshold {
            self.circuit_breaker_threshold = v;
        }
        if let Some(v) = config.git_watch_enabled {
            self.git_watch_enabled = v;
        }
        if let Some(v) = config.git_watch_debounce_ms {
            self.git_watch_debounce_ms = v;
        }
        self.validate();
    }

    /// Clamp values so a bad config cannot spin the scheduler
    pub fn validate(&mut self) {
        self.poll_interval_active = self.poll_interval_active.max(MIN_POLL_INTERVAL_MS);
        self.poll_interval_background = self.poll_interval_background.max(MIN_POLL_INTERVAL_MS);
        self.poll_interval_max = self
            .poll_interval_max
            .max(self.poll_interval_active)
            .max(self.poll_interval_background);
        self.circuit_breaker_threshold = self.circuit_breaker_threshold.max(1);
    }

    /// Base poll interval for a worktree in the given activity tier
    pub fn interval_for(&self, is_current: bool) -> u64 {
        if is_current {
            self.poll_interval_active
        } else {
            self.poll_interval_background
        }
    }

    /// Delay before a circuit-breaker probe, jitter excluded
    pub fn circuit_breaker_cooldown(&self) -> u64 {
        self.poll_interval_max.max(CIRCUIT_BREAKER_MIN_COOLDOWN_MS)
    }
}
