//! Public API layer (Facade) for wtmon-core.
//!
//! This module provides [`WorktreeMonitor`], a high-level entry-point that
//! owns the monitoring engine and exposes typed query/action methods.
//! Consumers (CLI, UI bridges, PR/issue detectors) should use this API
//! instead of driving the engine directly.
//!
//! # Quick Start
//!
//! ```ignore
//! use wtmon_core::api::WorktreeMonitorBuilder;
//!
//! let monitor = WorktreeMonitorBuilder::new().build();
//! let mut rx = monitor.subscribe();
//!
//! let loaded = monitor.load_project(Path::new("/src/app")).await;
//! let worktrees = monitor.list_worktrees();
//! ```

mod actions;
mod builder;
mod core;
pub mod events;
mod queries;
pub mod types;

pub use builder::WorktreeMonitorBuilder;
pub use core::WorktreeMonitor;
pub use events::{ProjectEvent, SnapshotEmitter, SystemEvent};
pub use types::{
    ApiError, CreateWorktreeResult, DeleteWorktreeResult, LoadProjectResult, PrInfo,
    RefreshOutcome, RefreshResult, SetActiveResult, SyncReport, WorktreeSnapshot,
};
