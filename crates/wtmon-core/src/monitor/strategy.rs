//! Adaptive poll interval and circuit breaker for a single monitor.
//!
//! Pure bookkeeping over recorded outcomes: no I/O, no clocks, no shared state.

use crate::config::{
    DEFAULT_CIRCUIT_BREAKER_THRESHOLD, DEFAULT_POLL_INTERVAL_BACKGROUND_MS,
    DEFAULT_POLL_INTERVAL_MAX_MS,
};

/// Cap on the backoff exponent so the shift cannot overflow
const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Per-monitor poll interval calculator
#[derive(Debug, Clone)]
pub struct PollingStrategy {
    base_interval_ms: u64,
    max_interval_ms: u64,
    adaptive_enabled: bool,
    breaker_threshold: u32,
    consecutive_failures: u32,
    tripped: bool,
    last_duration_ms: u64,
    last_queue_delay_ms: u64,
}

impl Default for PollingStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL_BACKGROUND_MS)
    }
}

impl PollingStrategy {
    pub fn new(base_interval_ms: u64) -> Self {
        Self {
            base_interval_ms,
            max_interval_ms: DEFAULT_POLL_INTERVAL_MAX_MS.max(base_interval_ms),
            adaptive_enabled: true,
            breaker_threshold: DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            consecutive_failures: 0,
            tripped: false,
            last_duration_ms: 0,
            last_queue_delay_ms: 0,
        }
    }

    /// A status check completed. Clears the failure streak and the breaker.
    pub fn record_success(&mut self, duration_ms: u64, queue_delay_ms: u64) {
        self.consecutive_failures = 0;
        self.tripped = false;
        self.last_duration_ms = duration_ms;
        self.last_queue_delay_ms = queue_delay_ms;
    }

    /// A status check failed.
    ///
    /// Returns true exactly on the failure that takes the streak to the
    /// breaker threshold.
    pub fn record_failure(&mut self, duration_ms: u64, queue_delay_ms: u64) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_duration_ms = duration_ms;
        self.last_queue_delay_ms = queue_delay_ms;

        if !self.tripped && self.consecutive_failures >= self.breaker_threshold {
            self.tripped = true;
            return true;
        }
        false
    }

    /// Delay before the next poll, in milliseconds.
    ///
    /// Without adaptive backoff this is always the base interval. With it, the
    /// base doubles per consecutive failure and is stretched by slow polls and
    /// by time spent waiting in the shared queue, up to the configured ceiling.
    pub fn calculate_next_interval(&self) -> u64 {
        if !self.adaptive_enabled {
            return self.base_interval_ms;
        }

        let exponent = self.consecutive_failures.min(MAX_BACKOFF_EXPONENT);
        let mut interval = self.base_interval_ms.saturating_mul(1u64 << exponent);

        // A poll that takes a large share of the interval means git is struggling
        interval = interval.max(self.last_duration_ms.saturating_mul(2));

        if self.last_queue_delay_ms > self.base_interval_ms {
            interval = interval.saturating_add(self.last_queue_delay_ms);
        }

        interval.clamp(self.base_interval_ms, self.max_interval_ms.max(self.base_interval_ms))
    }

    pub fn is_circuit_breaker_tripped(&self) -> bool {
        self.tripped
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn base_interval(&self) -> u64 {
        self.base_interval_ms
    }

    /// Forget all recorded history
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.tripped = false;
        self.last_duration_ms = 0;
        self.last_queue_delay_ms = 0;
    }

    pub fn set_base_interval(&mut self, base_interval_ms: u64) {
        self.base_interval_ms = base_interval_ms;
    }

    pub fn update_config(&mut self, adaptive_enabled: bool, max_interval_ms: u64, breaker_threshold: u32) {
        self.adaptive_enabled = adaptive_enabled;
        self.max_interval_ms = max_interval_ms;
        self.breaker_threshold = breaker_threshold.max(1);
    }
}
