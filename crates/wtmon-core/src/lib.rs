//! Core library for wtmon: worktree discovery, adaptive status polling with a
//! circuit breaker, filesystem watching and snapshot events.

pub mod api;
pub mod config;
pub mod git;
pub mod monitor;
pub mod mood;
pub mod notes;
pub mod watcher;
