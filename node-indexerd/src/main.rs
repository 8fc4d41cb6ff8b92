mod config;
mod index;
mod pipeline;
mod reconcile;
mod seed;
mod watcher;

use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::index::client::HttpIndex;
use crate::pipeline::Indexer;
use crate::watcher::WatchConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("node_indexerd=info")),
        )
        .init();

    tracing::info!("Starting node-indexerd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/node-indexer/indexerd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    // Connect to the search index
    let index = HttpIndex::connect(&config.index)
        .await
        .context("Failed to connect to the search index")?;

    tracing::info!("Connected to index {}", config.index.name);

    let indexer = Indexer::new(index, config.indexer.seed_file.clone());

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Spawn the file watch supervisor
    let watch_config = WatchConfig {
        seed_file: config.indexer.seed_file.clone(),
        poll_interval: Duration::from_secs(config.indexer.poll_interval_secs),
    };
    let supervisor_cancel = cancel.clone();
    let mut supervisor = tokio::spawn(watcher::run(indexer, watch_config, supervisor_cancel));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            tracing::info!("Shutdown signal received");
            cancel.cancel();
            supervisor
                .await
                .context("Supervisor task panicked")?
                .context("Supervisor failed during shutdown")?;
        }
        result = &mut supervisor => {
            match result.context("Supervisor task panicked")? {
                Ok(()) => tracing::info!("Supervisor exited"),
                Err(e) => return Err(e).context("Supervisor failed"),
            }
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
