//! Command runners for the `wtmon` binary.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use wtmon_core::api::{ProjectEvent, WorktreeMonitor, WorktreeMonitorBuilder};
use wtmon_core::notes::FileNoteReader;

use crate::config::Settings;

/// Build a monitor wired from settings
pub fn build_monitor(settings: &Settings) -> WorktreeMonitor {
    let mut builder = WorktreeMonitorBuilder::new()
        .with_config(settings.monitor.to_monitor_config())
        .with_max_concurrent_refreshes(settings.max_concurrent_refreshes)
        .with_discovery_ttl(Duration::from_millis(settings.discovery_ttl_ms))
        .with_status_cache_ttl(Duration::from_millis(settings.status_cache_ttl_ms));

    if settings.notes.enabled {
        builder = builder.with_note_reader(Arc::new(FileNoteReader::new(&settings.notes.file)));
    }

    builder.build()
}

fn print_event(event: &ProjectEvent) -> Result<()> {
    let line = serde_json::to_string(event).context("Failed to serialize event")?;
    println!("{}", line);
    Ok(())
}

/// Monitor a repository until Ctrl-C, streaming events to stdout as JSON lines
pub async fn run_watch(settings: &Settings, root: &Path, active: Option<&str>) -> Result<()> {
    let monitor = build_monitor(settings);
    let mut rx = monitor.subscribe();

    let loaded = monitor.load_project(root).await;
    if !loaded.success {
        bail!(
            "Failed to load {}: {}",
            root.display(),
            loaded.error.unwrap_or_default()
        );
    }
    println!("{}", serde_json::to_string(&loaded)?);

    if let Some(id) = active {
        let result = monitor.set_active_worktree(Some(id)).await;
        if !result.success {
            warn!(id, error = ?result.error, "Could not set active worktree");
        }
    }

    let mut rescan = tokio::time::interval(Duration::from_millis(settings.rescan_interval_ms));
    // The first tick completes immediately; the project was just loaded
    rescan.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(root = %root.display(), "Watching worktrees");
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => print_event(&event)?,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event consumer lagged, some updates were dropped");
                }
                Err(RecvError::Closed) => break,
            },
            _ = rescan.tick() => {
                match monitor.rescan(false).await {
                    Ok(report) => debug!(
                        created = report.created.len(),
                        removed = report.removed.len(),
                        "Rescan complete"
                    ),
                    Err(e) => warn!(error = %e, "Rescan failed"),
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    monitor.dispose().await;
    Ok(())
}

/// Load a repository once and print every worktree
pub async fn run_status(settings: &Settings, root: &Path, pretty: bool) -> Result<()> {
    let monitor = build_monitor(settings);
    let loaded = monitor.load_project(root).await;
    monitor.dispose().await;

    if !loaded.success {
        bail!(
            "Failed to load {}: {}",
            root.display(),
            loaded.error.unwrap_or_default()
        );
    }

    if pretty {
        println!("{}", serde_json::to_string_pretty(&loaded.worktrees)?);
    } else {
        for worktree in &loaded.worktrees {
            println!("{}", serde_json::to_string(worktree)?);
        }
    }
    Ok(())
}
