use std::collections::{HashMap, HashSet};
use chrono::{DateTime, Utc};
use shared::types::NodeRecord;
use crate::index::ops::IndexOp;

/// Merge a freshly parsed batch against the known set (records indexed
/// within the recency window) into one list of bulk instructions.
///
/// Every batch record gets `last_seen` overwritten to `now` and becomes an
/// update when its address is already known, an insert otherwise. Known
/// addresses absent from the batch become staleness-only updates. When the
/// dump repeats an address, the last occurrence in parse order wins, so at
/// most one instruction per address ever reaches the bulk request.
pub fn reconcile(batch: Vec<NodeRecord>, known: &[NodeRecord], now: DateTime<Utc>) -> Vec<IndexOp> {
    let mut last_occurrence: HashMap<String, usize> = HashMap::with_capacity(batch.len());
    for (i, node) in batch.iter().enumerate() {
        last_occurrence.insert(node.address.clone(), i);
    }

    let known_addresses: HashSet<&str> = known.iter().map(|n| n.address.as_str()).collect();

    let mut ops = Vec::with_capacity(last_occurrence.len() + known.len());

    for (i, mut node) in batch.into_iter().enumerate() {
        if last_occurrence[&node.address] != i {
            continue;
        }

        node.last_seen = now;
        node.stale = false;

        if known_addresses.contains(node.address.as_str()) {
            tracing::debug!("Updating node {}", node.address);
            ops.push(IndexOp::Update(node));
        } else {
            tracing::debug!("Inserting node {}", node.address);
            ops.push(IndexOp::Insert(node));
        }
    }

    for node in known {
        if !last_occurrence.contains_key(&node.address) {
            tracing::debug!("Marking node {} stale", node.address);
            ops.push(IndexOp::MarkStale(node.address.clone()));
        }
    }

    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_record(address: &str) -> NodeRecord {
        NodeRecord {
            address: address.to_string(),
            good: true,
            last_success: Utc::now() - Duration::minutes(5),
            last_seen: Utc::now() - Duration::hours(1),
            percent2h: 99.5,
            percent8h: 98.0,
            percent1d: 97.2,
            percent7d: 96.0,
            percent30d: 95.0,
            blocks: 12345,
            services: "NODE".to_string(),
            version: "1.0.0".to_string(),
            user_agent: "Satoshi:1.0.0".to_string(),
            user_agent_version: "1.0.0".to_string(),
            stale: false,
        }
    }

    #[test]
    fn test_known_and_new_split() {
        let now = Utc::now();
        let known = vec![test_record("a"), test_record("b")];
        let batch = vec![test_record("b"), test_record("c")];

        let ops = reconcile(batch, &known, now);
        assert_eq!(ops.len(), 3);

        match &ops[0] {
            IndexOp::Update(node) => {
                assert_eq!(node.address, "b");
                assert_eq!(node.last_seen, now);
            }
            other => panic!("Expected update for b, got {:?}", other),
        }
        match &ops[1] {
            IndexOp::Insert(node) => {
                assert_eq!(node.address, "c");
                assert_eq!(node.last_seen, now);
            }
            other => panic!("Expected insert for c, got {:?}", other),
        }
        match &ops[2] {
            IndexOp::MarkStale(address) => assert_eq!(address, "a"),
            other => panic!("Expected staleness update for a, got {:?}", other),
        }
    }

    #[test]
    fn test_idempotent_second_cycle() {
        let now = Utc::now();
        let batch = vec![test_record("a"), test_record("b")];

        let first = reconcile(batch.clone(), &[], now);
        assert!(first.iter().all(|op| matches!(op, IndexOp::Insert(_))));

        // Second cycle with an unchanged dump: the first cycle's records are
        // now the known set, so everything becomes an update and nothing is
        // marked stale.
        let known: Vec<NodeRecord> = first
            .iter()
            .map(|op| match op {
                IndexOp::Insert(node) => node.clone(),
                other => panic!("unexpected op {:?}", other),
            })
            .collect();

        let second = reconcile(batch, &known, now);
        assert_eq!(second.len(), 2);
        assert!(second.iter().all(|op| matches!(op, IndexOp::Update(_))));
    }

    #[test]
    fn test_duplicate_addresses_last_occurrence_wins() {
        let now = Utc::now();
        let mut early = test_record("a");
        early.blocks = 100;
        let mut late = test_record("a");
        late.blocks = 200;

        let ops = reconcile(vec![early, late], &[], now);
        assert_eq!(ops.len(), 1, "one instruction per address");
        match &ops[0] {
            IndexOp::Insert(node) => assert_eq!(node.blocks, 200),
            other => panic!("Expected insert, got {:?}", other),
        }
    }

    #[test]
    fn test_stale_records_reappearing_are_refreshed() {
        let now = Utc::now();
        let mut known = test_record("a");
        known.stale = true;

        let ops = reconcile(vec![test_record("a")], &[known], now);
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            IndexOp::Update(node) => {
                assert!(!node.stale);
                assert_eq!(node.last_seen, now);
            }
            other => panic!("Expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_batch_marks_all_known_stale() {
        let known = vec![test_record("a"), test_record("b")];
        let ops = reconcile(Vec::new(), &known, Utc::now());
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|op| matches!(op, IndexOp::MarkStale(_))));
    }
}
