use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio_util::sync::CancellationToken;

use crate::index::client::NodeIndex;
use crate::pipeline::{CycleOutcome, Indexer};

/// What happened to the watched path, reduced to what the supervisor
/// reacts to. Everything else the platform reports is dropped at the
/// watcher callback.
#[derive(Debug)]
pub enum PathEvent {
    /// File content changed in place
    Write,
    /// File appeared at the watched path
    Create,
    /// File was renamed away; the path may already hold a replacement
    Rename,
    /// File was deleted
    Remove,
    /// The watch backend itself failed
    Error(notify::Error),
}

pub struct WatchConfig {
    pub seed_file: PathBuf,
    pub poll_interval: Duration,
}

/// Keeps the platform watcher alive for as long as events should flow.
/// Dropping the handle tears the watch down.
struct WatchHandle {
    events: flume::Receiver<PathEvent>,
    _watcher: RecommendedWatcher,
}

enum WatchState {
    /// Seed file has never been seen; poll until it shows up
    AwaitingFile,
    /// Watch attached, reacting to events
    Watching(WatchHandle),
    /// Seed file went away; poll until it returns, then re-attach
    Reacquiring,
}

/// Supervise the seed file and run index cycles against it until cancelled.
///
/// One cycle runs on startup if the file already exists. After that, writes
/// trigger a cycle, a rename triggers one last cycle against whatever now
/// sits at the path before the watch is re-acquired, and a removal just
/// waits for the file to come back. Cycle failures are logged and the next
/// trigger retries; watch backend failures tear the supervisor down.
pub async fn run<C: NodeIndex>(
    indexer: Indexer<C>,
    config: WatchConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let mut state = match tokio::fs::metadata(&config.seed_file).await {
        Ok(_) => {
            run_and_report(&indexer).await;
            match attach(&config.seed_file) {
                Ok(handle) => WatchState::Watching(handle),
                Err(e) if is_not_found(&e) => WatchState::Reacquiring,
                Err(e) => return Err(e).context("Failed to watch seed file"),
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::info!(
                "Seed file {} not found, waiting for it to appear",
                config.seed_file.display()
            );
            WatchState::AwaitingFile
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to stat seed file {}", config.seed_file.display())
            });
        }
    };

    loop {
        state = match state {
            WatchState::AwaitingFile | WatchState::Reacquiring => {
                if !wait_until_exists(&config.seed_file, config.poll_interval, &cancel).await? {
                    break;
                }
                tracing::info!("Seed file {} found", config.seed_file.display());
                match attach(&config.seed_file) {
                    Ok(handle) => WatchState::Watching(handle),
                    // Lost a race with another rename; go back to polling
                    Err(e) if is_not_found(&e) => WatchState::Reacquiring,
                    Err(e) => return Err(e).context("Failed to watch seed file"),
                }
            }
            WatchState::Watching(handle) => {
                tokio::select! {
                    event = handle.events.recv_async() => match event {
                        Ok(PathEvent::Write) => {
                            tracing::debug!("Seed file written");
                            run_and_report(&indexer).await;
                            WatchState::Watching(handle)
                        }
                        Ok(PathEvent::Create) => {
                            tracing::debug!("Seed file created at watched path");
                            WatchState::Watching(handle)
                        }
                        Ok(PathEvent::Rename) => {
                            tracing::info!("Seed file renamed, reading it one last time");
                            run_and_report(&indexer).await;
                            WatchState::Reacquiring
                        }
                        Ok(PathEvent::Remove) => {
                            tracing::info!("Seed file removed, waiting for it to reappear");
                            WatchState::Reacquiring
                        }
                        Ok(PathEvent::Error(e)) => {
                            return Err(e).context("File watch failed");
                        }
                        Err(_) => {
                            anyhow::bail!("Watch event channel closed unexpectedly");
                        }
                    },
                    _ = cancel.cancelled() => break,
                }
            }
        };
    }

    tracing::info!("Supervisor stopping");
    Ok(())
}

async fn run_and_report<C: NodeIndex>(indexer: &Indexer<C>) {
    match indexer.run_cycle().await {
        Ok(CycleOutcome::Indexed {
            inserted,
            updated,
            staled,
            item_errors,
        }) => {
            tracing::info!(
                "Cycle applied: {} inserted, {} updated, {} marked stale, {} item errors",
                inserted,
                updated,
                staled,
                item_errors
            );
        }
        Ok(CycleOutcome::SeedMissing) | Ok(CycleOutcome::Empty) => {}
        Err(e) => tracing::error!("Index cycle failed: {:#}", e),
    }
}

/// Poll until the path exists. Returns false if cancelled first.
/// A stat failure other than NotFound is not retried.
async fn wait_until_exists(
    path: &Path,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<bool> {
    loop {
        match tokio::fs::metadata(path).await {
            Ok(_) => return Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to stat seed file {}", path.display()));
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = cancel.cancelled() => return Ok(false),
        }
    }
}

fn attach(path: &Path) -> Result<WatchHandle, notify::Error> {
    let (tx, rx) = flume::unbounded();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        let event = match result {
            Ok(event) => classify(&event),
            Err(e) => Some(PathEvent::Error(e)),
        };
        if let Some(event) = event {
            let _ = tx.send(event);
        }
    })?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;

    Ok(WatchHandle {
        events: rx,
        _watcher: watcher,
    })
}

/// Metadata-only changes and access notifications carry no new content,
/// so they never reach the supervisor.
fn classify(event: &Event) -> Option<PathEvent> {
    match event.kind {
        EventKind::Modify(ModifyKind::Name(_)) => Some(PathEvent::Rename),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(PathEvent::Write),
        EventKind::Create(_) => Some(PathEvent::Create),
        EventKind::Remove(_) => Some(PathEvent::Remove),
        _ => None,
    }
}

fn is_not_found(error: &notify::Error) -> bool {
    match &error.kind {
        notify::ErrorKind::PathNotFound => true,
        notify::ErrorKind::Io(e) => e.kind() == io::ErrorKind::NotFound,
        _ => false,
    }
}
