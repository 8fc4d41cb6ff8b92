use std::path::{Path, PathBuf};
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::NODES_INDEX;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
    /// Path to the crawler's seed dump file
    pub seed_file: PathBuf,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,
    #[serde(default = "default_index_name")]
    pub name: String,
    #[serde(default = "default_healthcheck")]
    pub healthcheck: bool,
    #[serde(default)]
    pub sniff: bool,
}

fn default_poll_interval() -> u64 {
    1
}

fn default_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:9200".to_string()]
}

fn default_index_name() -> String {
    NODES_INDEX.to_string()
}

fn default_healthcheck() -> bool {
    true
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            name: default_index_name(),
            healthcheck: default_healthcheck(),
            sniff: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
