use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use wtmon_core::config::{
    MonitorConfig, DEFAULT_CIRCUIT_BREAKER_THRESHOLD, DEFAULT_GIT_WATCH_DEBOUNCE_MS,
    DEFAULT_POLL_INTERVAL_ACTIVE_MS, DEFAULT_POLL_INTERVAL_BACKGROUND_MS,
    DEFAULT_POLL_INTERVAL_MAX_MS,
};
use wtmon_core::notes::DEFAULT_NOTE_FILE;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Worktree monitor")]
pub struct Config {
    /// Enable debug mode
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Poll interval for the active worktree in milliseconds
    #[arg(long, global = true)]
    pub active_interval: Option<u64>,

    /// Poll interval for background worktrees in milliseconds
    #[arg(long, global = true)]
    pub background_interval: Option<u64>,

    /// Disable filesystem watchers and rely on polling only
    #[arg(long, global = true)]
    pub no_git_watch: bool,

    /// Maximum number of status refreshes running at once
    #[arg(long, global = true)]
    pub max_concurrent: Option<usize>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Monitor every worktree of a repository and stream events as JSON lines
    Watch {
        /// Repository root (main worktree)
        root: PathBuf,

        /// Worktree id to treat as active (defaults to the main worktree)
        #[arg(long)]
        active: Option<String>,
    },
    /// Print the current status of every worktree and exit
    Status {
        /// Repository root (main worktree)
        root: PathBuf,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
}

impl Config {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Repository root named by the subcommand
    pub fn root(&self) -> &PathBuf {
        match &self.command {
            Command::Watch { root, .. } | Command::Status { root, .. } => root,
        }
    }
}

/// Application settings (from config file)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Maximum number of status refreshes running at once
    #[serde(default = "default_max_concurrent_refreshes")]
    pub max_concurrent_refreshes: usize,

    /// How long a discovered worktree list stays fresh (milliseconds)
    #[serde(default = "default_discovery_ttl")]
    pub discovery_ttl_ms: u64,

    /// How long a fetched status stays fresh (milliseconds)
    #[serde(default = "default_status_cache_ttl")]
    pub status_cache_ttl_ms: u64,

    /// How often `watch` re-discovers worktrees (milliseconds)
    #[serde(default = "default_rescan_interval")]
    pub rescan_interval_ms: u64,

    /// Monitor polling settings
    #[serde(default)]
    pub monitor: MonitorSettings,

    /// Agent note settings
    #[serde(default)]
    pub notes: NoteSettings,
}

fn default_max_concurrent_refreshes() -> usize {
    3
}

fn default_discovery_ttl() -> u64 {
    5_000
}

fn default_status_cache_ttl() -> u64 {
    1_000
}

fn default_rescan_interval() -> u64 {
    10_000
}

/// Polling and watcher settings, mirrored onto the engine's monitor config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Poll interval for the active worktree (milliseconds)
    #[serde(default = "default_poll_interval_active")]
    pub poll_interval_active_ms: u64,

    /// Poll interval for background worktrees (milliseconds)
    #[serde(default = "default_poll_interval_background")]
    pub poll_interval_background_ms: u64,

    /// Adaptive backoff ceiling (milliseconds)
    #[serde(default = "default_poll_interval_max")]
    pub poll_interval_max_ms: u64,

    /// Grow the poll interval on failures and slow status checks
    #[serde(default = "default_true")]
    pub adaptive_backoff: bool,

    /// Consecutive failures before polling is suspended
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    /// Use filesystem watchers as the primary refresh trigger
    #[serde(default = "default_true")]
    pub git_watch_enabled: bool,

    /// Debounce for watcher-triggered refreshes (milliseconds)
    #[serde(default = "default_git_watch_debounce")]
    pub git_watch_debounce_ms: u64,
}

fn default_poll_interval_active() -> u64 {
    DEFAULT_POLL_INTERVAL_ACTIVE_MS
}

fn default_poll_interval_background() -> u64 {
    DEFAULT_POLL_INTERVAL_BACKGROUND_MS
}

fn default_poll_interval_max() -> u64 {
    DEFAULT_POLL_INTERVAL_MAX_MS
}

fn default_circuit_breaker_threshold() -> u32 {
    DEFAULT_CIRCUIT_BREAKER_THRESHOLD
}

fn default_git_watch_debounce() -> u64 {
    DEFAULT_GIT_WATCH_DEBOUNCE_MS
}

fn default_true() -> bool {
    true
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_active_ms: default_poll_interval_active(),
            poll_interval_background_ms: default_poll_interval_background(),
            poll_interval_max_ms: default_poll_interval_max(),
            adaptive_backoff: true,
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            git_watch_enabled: true,
            git_watch_debounce_ms: default_git_watch_debounce(),
        }
    }
}

impl MonitorSettings {
    /// Engine-side config with every field set
    pub fn to_monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval_active: Some(self.poll_interval_active_ms),
            poll_interval_background: Some(self.poll_interval_background_ms),
            adaptive_backoff: Some(self.adaptive_backoff),
            poll_interval_max: Some(self.poll_interval_max_ms),
            circuit_breaker_threshold: Some(self.circuit_breaker_threshold),
            git_watch_enabled: Some(self.git_watch_enabled),
            git_watch_debounce_ms: Some(self.git_watch_debounce_ms),
        }
    }
}

/// Notes left by agents inside a worktree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteSettings {
    /// Read notes at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Note file, relative to the worktree root
    #[serde(default = "default_note_file")]
    pub file: String,
}

fn default_note_file() -> String {
    DEFAULT_NOTE_FILE.to_string()
}

impl Default for NoteSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            file: default_note_file(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_concurrent_refreshes: default_max_concurrent_refreshes(),
            discovery_ttl_ms: default_discovery_ttl(),
            status_cache_ttl_ms: default_status_cache_ttl(),
            rescan_interval_ms: default_rescan_interval(),
            monitor: MonitorSettings::default(),
            notes: NoteSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from config file or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        // Try custom path first
        if let Some(p) = path {
            if p.exists() {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file: {:?}", p))?;
                return toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {:?}", p));
            }
        }

        // Try default config locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("wtmon/config.toml")),
            dirs::home_dir().map(|p| p.join(".config/wtmon/config.toml")),
            dirs::home_dir().map(|p| p.join(".wtmon.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {:?}", path))?;
                return toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {:?}", path));
            }
        }

        // Return defaults if no config file found
        Ok(Self::default())
    }

    /// Merge CLI config into settings (CLI takes precedence)
    pub fn merge_cli(&mut self, cli: &Config) {
        if let Some(ms) = cli.active_interval {
            self.monitor.poll_interval_active_ms = ms;
        }
        if let Some(ms) = cli.background_interval {
            self.monitor.poll_interval_background_ms = ms;
        }
        if cli.no_git_watch {
            self.monitor.git_watch_enabled = false;
        }
        if let Some(max) = cli.max_concurrent {
            self.max_concurrent_refreshes = max;
        }
    }

    /// Validate and normalize settings values
    ///
    /// Ensures intervals have a minimum value to prevent CPU exhaustion.
    pub fn validate(&mut self) {
        const MIN_POLL_INTERVAL: u64 = 100;
        const MIN_RESCAN_INTERVAL: u64 = 1_000;

        let monitor = &mut self.monitor;
        monitor.poll_interval_active_ms = monitor.poll_interval_active_ms.max(MIN_POLL_INTERVAL);
        monitor.poll_interval_background_ms =
            monitor.poll_interval_background_ms.max(MIN_POLL_INTERVAL);
        monitor.poll_interval_max_ms = monitor
            .poll_interval_max_ms
            .max(monitor.poll_interval_active_ms)
            .max(monitor.poll_interval_background_ms);
        monitor.circuit_breaker_threshold = monitor.circuit_breaker_threshold.max(1);

        self.max_concurrent_refreshes = self.max_concurrent_refreshes.max(1);
        self.rescan_interval_ms = self.rescan_interval_ms.max(MIN_RESCAN_INTERVAL);
    }
}
