/// Default search-index collection holding one document per peer address
pub const NODES_INDEX: &str = "mainnet.nodes";

/// Trailing window bounding which indexed records take part in reconciliation
pub const RECENCY_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Size cap on the known-set read. A single bounded request, no pagination;
/// recent documents beyond this cap are invisible to staleness computation.
pub const KNOWN_NODES_PAGE_SIZE: usize = 10_000;
