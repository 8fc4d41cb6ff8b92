use anyhow::{Context, Result};
use serde_json::json;
use shared::types::NodeRecord;

/// One reconciled bulk instruction, keyed by peer address.
#[derive(Debug, Clone)]
pub enum IndexOp {
    /// Address not in the known set: index the full document
    Insert(NodeRecord),
    /// Address already known: merge the full document over the existing one
    Update(NodeRecord),
    /// Address vanished from the dump: flip `stale`, touch nothing else
    MarkStale(String),
}

impl IndexOp {
    pub fn address(&self) -> &str {
        match self {
            Self::Insert(node) | Self::Update(node) => &node.address,
            Self::MarkStale(address) => address,
        }
    }
}

/// Build the NDJSON payload for one `_bulk` request.
///
/// Inserts become `index` actions carrying the full document, updates become
/// `update` actions with `{"doc": <document>}`, staleness instructions
/// become `update` actions whose partial doc is only `{"stale": true}`.
/// Every action is addressed by `_id` = address.
pub fn bulk_body(index: &str, ops: &[IndexOp]) -> Result<String> {
    let mut body = String::new();

    for op in ops {
        let (action, doc) = match op {
            IndexOp::Insert(node) => (
                json!({"index": {"_index": index, "_id": node.address}}),
                serde_json::to_value(node)
                    .with_context(|| format!("Failed to serialize node {}", node.address))?,
            ),
            IndexOp::Update(node) => (
                json!({"update": {"_index": index, "_id": node.address}}),
                json!({
                    "doc": serde_json::to_value(node).with_context(|| {
                        format!("Failed to serialize node {}", node.address)
                    })?
                }),
            ),
            IndexOp::MarkStale(address) => (
                json!({"update": {"_index": index, "_id": address}}),
                json!({"doc": {"stale": true}}),
            ),
        };

        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&doc.to_string());
        body.push('\n');
    }

    Ok(body)
}
