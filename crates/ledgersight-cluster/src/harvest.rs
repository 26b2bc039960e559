//! Merge-evidence harvesting from the transfer log.
//!
//! Scans log entries between the last harvested position and a pinned
//! snapshot, extracting three kinds of co-control evidence:
//!
//! - **Common input**: distinct senders co-funding one transaction.
//! - **Peel continuation**: a two-output split where the larger output
//!   is treated as the sender's change.
//! - **Temporal similarity**: senders sharing enough distinct
//!   counterparties.
//!
//! The harvester is incremental; repeated runs over the same snapshot
//! re-feed evidence the engine already absorbed, which the engine
//! treats as a no-op.

use crate::engine::{ClusterEngine, MergeOutcome, MergeReason};
use ledgersight_core::config::ClusteringConfig;
use ledgersight_core::types::{AddressId, GraphVersion};
use ledgersight_graph::GraphStore;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Counts from one harvest run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestReport {
    /// Log entries scanned.
    pub scanned: u64,
    /// Merges applied.
    pub merges: usize,
    /// Evidence accumulated below the merge threshold.
    pub pending: usize,
    /// Merges held back by separation assertions.
    pub held: usize,
    /// Members of every cluster that merged this run. A merge changes
    /// the membership of addresses far from the triggering transfer, so
    /// callers invalidate these explicitly.
    pub merged_members: Vec<AddressId>,
}

#[derive(Default)]
struct SimilarityIndex {
    // Receiving address -> senders that have paid it.
    senders_into: HashMap<AddressId, HashSet<AddressId>>,
    // Ordered sender pair -> distinct shared counterparties.
    shared: HashMap<(AddressId, AddressId), usize>,
}

/// Incremental evidence extractor feeding a [`ClusterEngine`].
pub struct ClusterHarvester {
    store: Arc<GraphStore>,
    engine: Arc<ClusterEngine>,
    config: ClusteringConfig,
    cursor: AtomicU64,
    similarity: Mutex<SimilarityIndex>,
}

impl ClusterHarvester {
    /// Create a harvester starting at the head of the log.
    #[must_use]
    pub fn new(
        store: Arc<GraphStore>,
        engine: Arc<ClusterEngine>,
        config: ClusteringConfig,
    ) -> Self {
        Self {
            store,
            engine,
            config,
            cursor: AtomicU64::new(0),
            similarity: Mutex::new(SimilarityIndex::default()),
        }
    }

    /// Harvest evidence from log entries since the previous run, up to
    /// the given snapshot.
    pub fn run(&self, at: GraphVersion) -> HarvestReport {
        let start = self.cursor.load(Ordering::Acquire);
        let mut report = HarvestReport::default();
        let mut seen_txs: HashSet<String> = HashSet::new();

        for seq in start..at.0 {
            let Some(transfer) = self.store.transfer_at(seq, at) else {
                break;
            };
            report.scanned += 1;

            if seen_txs.insert(transfer.tx_id.clone()) {
                self.harvest_tx(&transfer.tx_id, at, &mut report);
            }
            self.harvest_similarity(transfer.from, transfer.to, &mut report);
        }

        self.cursor.store(at.0, Ordering::Release);
        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                merges = report.merges,
                pending = report.pending,
                held = report.held,
                "cluster evidence harvested"
            );
        }
        report
    }

    fn harvest_tx(&self, tx_id: &str, at: GraphVersion, report: &mut HarvestReport) {
        let legs = self.store.legs_of_tx(tx_id, at);

        let senders: Vec<AddressId> = {
            let mut seen = HashSet::new();
            legs.iter()
                .map(|(_, t)| t.from)
                .filter(|s| seen.insert(*s))
                .collect()
        };

        // Distinct senders co-funding one transaction.
        if let Some((&anchor, rest)) = senders.split_first() {
            for &other in rest {
                self.record(
                    self.engine.assert_same(
                        anchor,
                        other,
                        self.config.common_input_confidence,
                        MergeReason::CommonInput,
                    ),
                    report,
                );
            }
        }

        // Two-output split from a single sender: the larger output is
        // presumed change and linked back to the sender.
        if senders.len() == 1 {
            let sender = senders[0];
            let mut outputs: Vec<(AddressId, f64)> =
                legs.iter().map(|(_, t)| (t.to, t.amount)).collect();
            if outputs.len() == 2 {
                outputs.sort_by(|a, b| b.1.total_cmp(&a.1));
                let change = outputs[0].0;
                if change != sender {
                    self.record(
                        self.engine.assert_same(
                            sender,
                            change,
                            self.config.peel_continuation_confidence,
                            MergeReason::PeelContinuation,
                        ),
                        report,
                    );
                }
            }
        }
    }

    fn harvest_similarity(&self, from: AddressId, to: AddressId, report: &mut HarvestReport) {
        let mut index = self.similarity.lock().unwrap();
        let senders = index.senders_into.entry(to).or_default();
        if !senders.insert(from) {
            return;
        }
        let peers: Vec<AddressId> = senders.iter().copied().filter(|&s| s != from).collect();
        for peer in peers {
            let key = if from <= peer { (from, peer) } else { (peer, from) };
            let count = index.shared.entry(key).or_insert(0);
            *count += 1;
            if *count == self.config.min_shared_counterparties {
                self.record(
                    self.engine.assert_same(
                        key.0,
                        key.1,
                        self.config.temporal_similarity_confidence,
                        MergeReason::TemporalSimilarity,
                    ),
                    report,
                );
            }
        }
    }

    fn record(&self, outcome: MergeOutcome, report: &mut HarvestReport) {
        match outcome {
            MergeOutcome::Merged(cluster) => {
                report.merges += 1;
                report.merged_members.extend(self.engine.members(cluster));
            }
            MergeOutcome::Pending => report.pending += 1,
            MergeOutcome::Held => report.held += 1,
            MergeOutcome::AlreadySame(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersight_core::types::Transfer;

    fn transfer(tx_id: &str, from: u64, to: u64, amount: f64, ts: u64) -> Transfer {
        Transfer {
            tx_id: tx_id.to_string(),
            chain: "btc".to_string(),
            from,
            to,
            asset: "btc".to_string(),
            amount,
            converted_value: None,
            timestamp: ts,
            block_height: 1,
        }
    }

    fn harvester(store: Arc<GraphStore>) -> (ClusterHarvester, Arc<ClusterEngine>) {
        let engine = Arc::new(ClusterEngine::new(ClusteringConfig::default()));
        (
            ClusterHarvester::new(store, Arc::clone(&engine), ClusteringConfig::default()),
            engine,
        )
    }

    #[test]
    fn test_common_input_merges_senders() {
        let store = Arc::new(GraphStore::new());
        // One tx, two legs, two senders: classic joint-input spend.
        store.ingest(transfer("tx1", 1, 9, 50.0, 100)).unwrap();
        store.ingest(transfer("tx1", 2, 9, 50.0, 100)).unwrap();
        let at = store.snapshot();

        let (harvester, engine) = harvester(store);
        let report = harvester.run(at);

        assert_eq!(report.merges, 1);
        assert_eq!(engine.cluster_of(1), engine.cluster_of(2));
    }

    #[test]
    fn test_peel_change_links_sender_to_larger_output() {
        let store = Arc::new(GraphStore::new());
        store.ingest(transfer("tx1", 1, 2, 95.0, 100)).unwrap();
        store.ingest(transfer("tx1", 1, 3, 5.0, 100)).unwrap();
        let at = store.snapshot();

        let (harvester, engine) = harvester(store);
        harvester.run(at);

        // Change at 0.6 confidence stays pending below the 0.75 bar.
        assert!(engine.cluster_of(1).is_some());
        assert_ne!(engine.cluster_of(1), engine.cluster_of(3));
    }

    #[test]
    fn test_incremental_runs_do_not_rescan() {
        let store = Arc::new(GraphStore::new());
        store.ingest(transfer("tx1", 1, 9, 50.0, 100)).unwrap();
        store.ingest(transfer("tx1", 2, 9, 50.0, 100)).unwrap();
        let at = store.snapshot();

        let (harvester, _engine) = harvester(Arc::clone(&store));
        let first = harvester.run(at);
        assert_eq!(first.scanned, 2);

        let again = harvester.run(at);
        assert_eq!(again.scanned, 0);

        store.ingest(transfer("tx2", 3, 9, 10.0, 200)).unwrap();
        let later = store.snapshot();
        assert_eq!(harvester.run(later).scanned, 1);
    }

    #[test]
    fn test_merge_reports_every_member_for_invalidation() {
        let store = Arc::new(GraphStore::new());
        store.ingest(transfer("tx1", 1, 9, 50.0, 100)).unwrap();
        store.ingest(transfer("tx1", 2, 9, 50.0, 100)).unwrap();
        let at = store.snapshot();

        let (harvester, _engine) = harvester(store);
        let report = harvester.run(at);

        assert_eq!(report.merges, 1);
        assert!(report.merged_members.contains(&1));
        assert!(report.merged_members.contains(&2));
    }

    #[test]
    fn test_shared_counterparties_accumulate_evidence() {
        let store = Arc::new(GraphStore::new());
        // Addresses 1 and 2 pay the same three counterparties. Three
        // shared counterparties trip temporal-similarity evidence.
        for (i, cp) in [100u64, 101, 102].iter().enumerate() {
            store
                .ingest(transfer(&format!("a{i}"), 1, *cp, 10.0, 100 + i as u64))
                .unwrap();
            store
                .ingest(transfer(&format!("b{i}"), 2, *cp, 10.0, 200 + i as u64))
                .unwrap();
        }
        let at = store.snapshot();

        let (harvester, engine) = harvester(store);
        let report = harvester.run(at);

        // 0.4 alone is below the merge threshold: recorded, not merged.
        assert_eq!(report.pending, 1);
        assert_ne!(engine.cluster_of(1), engine.cluster_of(2));
    }
}
