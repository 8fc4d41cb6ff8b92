use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use shared::protocol::KNOWN_NODES_PAGE_SIZE;
use shared::types::NodeRecord;

use crate::config::IndexConfig;
use super::ops::{bulk_body, IndexOp};

/// Boundary to the search index. The pipeline only needs the bounded
/// known-set read and the per-cycle bulk write; tests substitute a mock.
#[async_trait]
pub trait NodeIndex: Send + Sync {
    /// Documents whose `lastSeen` is strictly greater than `cutoff`.
    /// A single bounded read, capped at [`KNOWN_NODES_PAGE_SIZE`] documents.
    async fn recent(&self, cutoff: DateTime<Utc>) -> Result<Vec<NodeRecord>>;

    /// Apply all instructions as one bulk request. Item-level failures are
    /// reported in the summary, not as an error; a later cycle retries them.
    async fn bulk(&self, ops: &[IndexOp]) -> Result<BulkSummary>;
}

/// Outcome of one bulk request
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkSummary {
    pub items: usize,
    pub item_errors: usize,
}

/// HTTP client for an Elasticsearch-compatible search index.
/// Endpoints are tried in order until one accepts the request.
pub struct HttpIndex {
    http: reqwest::Client,
    endpoints: Vec<String>,
    index: String,
}

impl HttpIndex {
    /// Build a client from config. Sniffing extends the endpoint list from
    /// the cluster's reported publish addresses; the health check requires
    /// at least one endpoint to answer before the client is handed out.
    pub async fn connect(config: &IndexConfig) -> Result<Self> {
        if config.endpoints.is_empty() {
            bail!("No index endpoints configured");
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        let mut client = Self {
            http,
            endpoints: config.endpoints.clone(),
            index: config.name.clone(),
        };

        if config.sniff {
            client.sniff().await?;
        }
        if config.healthcheck {
            client.ping().await?;
        }

        Ok(client)
    }

    async fn sniff(&mut self) -> Result<()> {
        #[derive(Deserialize)]
        struct NodesResponse {
            nodes: HashMap<String, NodeInfo>,
        }
        #[derive(Deserialize)]
        struct NodeInfo {
            http: Option<HttpInfo>,
        }
        #[derive(Deserialize)]
        struct HttpInfo {
            publish_address: Option<String>,
        }

        let url = format!("{}/_nodes/http", self.endpoints[0]);
        let response: NodesResponse = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to sniff cluster at {}", url))?
            .error_for_status()
            .context("Sniff request rejected")?
            .json()
            .await
            .context("Failed to decode sniff response")?;

        for info in response.nodes.values() {
            let Some(address) = info.http.as_ref().and_then(|h| h.publish_address.as_deref())
            else {
                continue;
            };
            let endpoint = format!("http://{}", address);
            if !self.endpoints.contains(&endpoint) {
                tracing::info!("Discovered index endpoint {}", endpoint);
                self.endpoints.push(endpoint);
            }
        }

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        for endpoint in &self.endpoints {
            match self.http.get(endpoint).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::info!("Index endpoint {} is healthy", endpoint);
                    return Ok(());
                }
                Ok(response) => {
                    tracing::warn!("Index endpoint {} answered {}", endpoint, response.status());
                }
                Err(e) => {
                    tracing::warn!("Index endpoint {} unreachable: {}", endpoint, e);
                }
            }
        }
        bail!("No healthy index endpoint among {:?}", self.endpoints)
    }
}

#[async_trait]
impl NodeIndex for HttpIndex {
    async fn recent(&self, cutoff: DateTime<Utc>) -> Result<Vec<NodeRecord>> {
        let body = search_body(cutoff);

        let mut last_error = None;
        for endpoint in &self.endpoints {
            let url = format!("{}/{}/_search", endpoint, self.index);
            match self.http.post(&url).json(&body).send().await {
                Ok(response) => {
                    let response: SearchResponse = response
                        .error_for_status()
                        .context("Search request rejected")?
                        .json()
                        .await
                        .context("Failed to decode search response")?;
                    return Ok(collect_hits(response));
                }
                Err(e) => {
                    tracing::warn!("Search via {} failed: {}", endpoint, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .map(anyhow::Error::from)
            .unwrap_or_else(|| anyhow::anyhow!("no endpoints"))
            .context("Search failed on every endpoint"))
    }

    async fn bulk(&self, ops: &[IndexOp]) -> Result<BulkSummary> {
        let body = bulk_body(&self.index, ops)?;

        let mut last_error = None;
        for endpoint in &self.endpoints {
            let url = format!("{}/_bulk", endpoint);
            match self
                .http
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                .body(body.clone())
                .send()
                .await
            {
                Ok(response) => {
                    let response: BulkResponse = response
                        .error_for_status()
                        .context("Bulk request rejected")?
                        .json()
                        .await
                        .context("Failed to decode bulk response")?;
                    return Ok(summarize(response));
                }
                Err(e) => {
                    tracing::warn!("Bulk via {} failed: {}", endpoint, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .map(anyhow::Error::from)
            .unwrap_or_else(|| anyhow::anyhow!("no endpoints"))
            .context("Bulk failed on every endpoint"))
    }
}

fn search_body(cutoff: DateTime<Utc>) -> serde_json::Value {
    json!({
        "size": KNOWN_NODES_PAGE_SIZE,
        "query": {
            "range": {
                "lastSeen": { "gt": cutoff }
            }
        }
    })
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source")]
    source: serde_json::Value,
}

/// Documents that fail to deserialize are skipped, not fatal; the rest of
/// the known set still participates in reconciliation.
fn collect_hits(response: SearchResponse) -> Vec<NodeRecord> {
    let mut known = Vec::with_capacity(response.hits.hits.len());
    for hit in response.hits.hits {
        match serde_json::from_value::<NodeRecord>(hit.source) {
            Ok(node) => known.push(node),
            Err(e) => tracing::warn!("Skipping malformed document {}: {}", hit.id, e),
        }
    }
    known
}

#[derive(Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

fn summarize(response: BulkResponse) -> BulkSummary {
    let mut item_errors = 0;

    if response.errors {
        for item in &response.items {
            // Each item is a single-key object: {"index": {...}} or {"update": {...}}
            let Some(detail) = item.as_object().and_then(|obj| obj.values().next()) else {
                continue;
            };
            if let Some(error) = detail.get("error") {
                item_errors += 1;
                let id = detail.get("_id").and_then(|v| v.as_str()).unwrap_or("?");
                tracing::warn!("Bulk item {} failed: {}", id, error);
            }
        }
    }

    BulkSummary {
        items: response.items.len(),
        item_errors,
    }
}
