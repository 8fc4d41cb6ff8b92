use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observed network peer from the crawler dump.
/// This is the canonical data model used by the parser, the reconciler, and
/// the search-index documents (one document per address, `_id` = address).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    /// Peer address, e.g. "1.2.3.4:5620". Sole identity key.
    pub address: String,

    /// Whether the crawler currently considers the peer good
    pub good: bool,

    /// Last successful connection, seconds resolution
    pub last_success: DateTime<Utc>,

    /// Time of the parse cycle that last saw this peer, truncated to seconds
    pub last_seen: DateTime<Utc>,

    /// Uptime over the trailing 2 hours, percent
    pub percent2h: f64,

    /// Uptime over the trailing 8 hours, percent
    pub percent8h: f64,

    /// Uptime over the trailing day, percent
    pub percent1d: f64,

    /// Uptime over the trailing week, percent
    pub percent7d: f64,

    /// Uptime over the trailing 30 days, percent
    pub percent30d: f64,

    /// Best block height reported by the peer
    pub blocks: i64,

    /// Service bits as an opaque token, e.g. "NODE_NETWORK"
    pub services: String,

    /// Protocol version string
    pub version: String,

    /// User agent with outer quote/slash characters trimmed
    pub user_agent: String,

    /// Digits and dots of the user agent, e.g. "1.0.0"
    pub user_agent_version: String,

    /// Set during reconciliation when the peer vanished from the latest dump
    pub stale: bool,
}
