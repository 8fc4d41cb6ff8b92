use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Duration, SubsecRound, Utc};
use shared::protocol::RECENCY_WINDOW_SECS;

use crate::index::client::NodeIndex;
use crate::index::ops::IndexOp;
use crate::reconcile;
use crate::seed;

/// Result of one parse → reconcile → bulk-upsert cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Seed file missing at parse time; the next trigger retries
    SeedMissing,
    /// Dump parsed to zero records; no index write
    Empty,
    /// Bulk request applied
    Indexed {
        inserted: usize,
        updated: usize,
        staled: usize,
        item_errors: usize,
    },
}

/// Owns the parse → reconcile → write pipeline for one seed file.
/// Cycles are run-to-completion; the supervisor never overlaps two of them.
pub struct Indexer<C> {
    index: C,
    seed_file: PathBuf,
}

impl<C: NodeIndex> Indexer<C> {
    pub fn new(index: C, seed_file: PathBuf) -> Self {
        Self { index, seed_file }
    }

    /// Run one full cycle against the current dump content.
    ///
    /// An index read failure aborts the cycle before any write: reconciling
    /// against an unknown known-set would mark every record as new. A bulk
    /// transport failure also aborts; item-level bulk failures only count in
    /// the outcome, since addresses still in the dump are retried next cycle.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        tracing::info!("Parsing file: {}", self.seed_file.display());

        let contents = match tokio::fs::read_to_string(&self.seed_file).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!("Failed to locate dump at {}", self.seed_file.display());
                return Ok(CycleOutcome::SeedMissing);
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read seed file {}", self.seed_file.display())
                });
            }
        };

        let now = Utc::now().trunc_subsecs(0);

        let batch = seed::parse(&contents, now);
        if batch.is_empty() {
            tracing::info!("No nodes found in dump");
            return Ok(CycleOutcome::Empty);
        }
        tracing::info!("Found {} nodes", batch.len());

        let cutoff = now - Duration::seconds(RECENCY_WINDOW_SECS);
        let known = self
            .index
            .recent(cutoff)
            .await
            .context("Failed to fetch known nodes")?;
        tracing::info!("Found {} known nodes", known.len());

        let ops = reconcile::reconcile(batch, &known, now);

        let (mut inserted, mut updated, mut staled) = (0, 0, 0);
        for op in &ops {
            match op {
                IndexOp::Insert(_) => inserted += 1,
                IndexOp::Update(_) => updated += 1,
                IndexOp::MarkStale(_) => staled += 1,
            }
        }

        let summary = self.index.bulk(&ops).await.context("Bulk request failed")?;
        if summary.item_errors > 0 {
            tracing::warn!(
                "{} of {} bulk items failed; a later cycle retries them",
                summary.item_errors,
                summary.items
            );
        }

        Ok(CycleOutcome::Indexed {
            inserted,
            updated,
            staled,
            item_errors: summary.item_errors,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use shared::types::NodeRecord;
    use std::io::Write;
    use std::sync::Mutex;
    use crate::index::client::BulkSummary;

    /// Records every bulk request and serves a canned known set.
    pub(crate) struct MockIndex {
        pub known: Mutex<Vec<NodeRecord>>,
        pub bulks: Mutex<Vec<Vec<IndexOp>>>,
        pub fail_recent: bool,
    }

    impl MockIndex {
        pub fn new() -> Self {
            Self {
                known: Mutex::new(Vec::new()),
                bulks: Mutex::new(Vec::new()),
                fail_recent: false,
            }
        }

        pub fn bulk_count(&self) -> usize {
            self.bulks.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl NodeIndex for MockIndex {
        async fn recent(&self, _cutoff: DateTime<Utc>) -> Result<Vec<NodeRecord>> {
            if self.fail_recent {
                anyhow::bail!("search unavailable");
            }
            Ok(self.known.lock().unwrap().clone())
        }

        async fn bulk(&self, ops: &[IndexOp]) -> Result<BulkSummary> {
            self.bulks.lock().unwrap().push(ops.to_vec());
            Ok(BulkSummary {
                items: ops.len(),
                item_errors: 0,
            })
        }
    }

    impl NodeIndex for &MockIndex {
        fn recent<'a, 'b>(
            &'a self,
            cutoff: DateTime<Utc>,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<Vec<NodeRecord>>> + Send + 'b>,
        >
        where
            'a: 'b,
            Self: 'b,
        {
            (**self).recent(cutoff)
        }

        fn bulk<'a, 'b, 'c>(
            &'a self,
            ops: &'b [IndexOp],
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<BulkSummary>> + Send + 'c>>
        where
            'a: 'c,
            'b: 'c,
            Self: 'c,
        {
            (**self).bulk(ops)
        }
    }

    fn sample_line(address: &str) -> String {
        format!(
            "{} 1 1600000000 99.5% 98% 97.2% 96% 95% 12345 NODE 1.0.0 /Satoshi:1.0.0/",
            address
        )
    }

    fn known_record(address: &str) -> NodeRecord {
        NodeRecord {
            address: address.to_string(),
            good: true,
            last_success: Utc::now(),
            last_seen: Utc::now() - chrono::Duration::hours(1),
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

    fn write_seed(lines: &[String]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_cycle_splits_inserts_updates_and_stales() {
        let seed = write_seed(&[sample_line("b"), sample_line("c")]);
        let mock = MockIndex::new();
        mock.known
            .lock()
            .unwrap()
            .extend([known_record("a"), known_record("b")]);

        let indexer = Indexer::new(&mock, seed.path().to_path_buf());
        let outcome = indexer.run_cycle().await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Indexed {
                inserted: 1,
                updated: 1,
                staled: 1,
                item_errors: 0
            }
        );

        let bulks = mock.bulks.lock().unwrap();
        assert_eq!(bulks.len(), 1);
        let addresses: Vec<&str> = bulks[0].iter().map(|op| op.address()).collect();
        assert_eq!(addresses, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_missing_seed_is_a_recoverable_no_op() {
        let mock = MockIndex::new();
        let indexer = Indexer::new(&mock, PathBuf::from("/nonexistent/seeds.txt"));

        let outcome = indexer.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::SeedMissing);
        assert_eq!(mock.bulk_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_dump_writes_nothing() {
        let seed = write_seed(&["# header comment".to_string()]);
        let mock = MockIndex::new();
        let indexer = Indexer::new(&mock, seed.path().to_path_buf());

        let outcome = indexer.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Empty);
        assert_eq!(mock.bulk_count(), 0);
    }

    #[tokio::test]
    async fn test_known_set_read_failure_aborts_before_any_write() {
        let seed = write_seed(&[sample_line("a")]);
        let mut mock = MockIndex::new();
        mock.fail_recent = true;

        let indexer = Indexer::new(&mock, seed.path().to_path_buf());
        assert!(indexer.run_cycle().await.is_err());
        assert_eq!(mock.bulk_count(), 0);
    }

    #[tokio::test]
    async fn test_fresh_last_seen_is_whole_seconds() {
        let seed = write_seed(&[sample_line("a")]);
        let mock = MockIndex::new();
        let indexer = Indexer::new(&mock, seed.path().to_path_buf());
        indexer.run_cycle().await.unwrap();

        let bulks = mock.bulks.lock().unwrap();
        match &bulks[0][0] {
            IndexOp::Insert(node) => {
                assert_eq!(node.last_seen.timestamp_subsec_nanos(), 0);
            }
            other => panic!("Expected insert, got {:?}", other),
        }
    }
}
