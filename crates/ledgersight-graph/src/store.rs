//! Append-only transfer graph store.
//!
//! The store is a single-writer append log plus adjacency indexes.
//! [`GraphStore::snapshot`] hands out a monotonically increasing
//! [`GraphVersion`] equal to the current log length; every read takes a
//! version and bounds itself to log entries below it, so readers never
//! observe transfers ingested after their snapshot while the writer
//! keeps appending.

use ledgersight_core::error::{EngineError, IngestError, Result};
use ledgersight_core::types::{AddressId, AddressRecord, Direction, GraphVersion, TimeWindow, Transfer};
use hashbrown::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Cursor-based neighbor query parameters.
///
/// `after_seq` makes the sequence restartable: pass the last seq of the
/// previous page to resume where it left off.
#[derive(Debug, Clone, Copy)]
pub struct NeighborQuery {
    /// Edge direction relative to the queried address.
    pub direction: Direction,
    /// Event-time filter.
    pub window: TimeWindow,
    /// Maximum transfers returned.
    pub limit: usize,
    /// Resume after this log sequence number (exclusive).
    pub after_seq: Option<u64>,
}

impl Default for NeighborQuery {
    fn default() -> Self {
        Self {
            direction: Direction::Outgoing,
            window: TimeWindow::all(),
            limit: 1_000,
            after_seq: None,
        }
    }
}

#[derive(Default)]
struct StoreInner {
    log: Vec<Arc<Transfer>>,
    out_edges: HashMap<AddressId, Vec<u64>>,
    in_edges: HashMap<AddressId, Vec<u64>>,
    tx_legs: HashMap<String, Vec<u64>>,
    dedup: HashSet<(String, AddressId, AddressId)>,
    addresses: HashMap<AddressId, AddressRecord>,
}

/// Append-only adjacency structure over addresses and transfers.
pub struct GraphStore {
    inner: RwLock<StoreInner>,
    // Published after the append completes; equals the visible log length.
    version: AtomicU64,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            version: AtomicU64::new(0),
        }
    }

    /// Take a snapshot token covering all transfers ingested so far.
    #[must_use]
    pub fn snapshot(&self) -> GraphVersion {
        GraphVersion(self.version.load(Ordering::Acquire))
    }

    /// Ingest one transfer.
    ///
    /// Malformed or duplicate transfers are rejected individually; the
    /// store is unchanged on rejection.
    pub fn ingest(&self, transfer: Transfer) -> std::result::Result<(), IngestError> {
        Self::validate(&transfer)?;

        let mut inner = self.inner.write().expect("graph store lock poisoned");

        let key = (transfer.tx_id.clone(), transfer.from, transfer.to);
        if inner.dedup.contains(&key) {
            return Err(IngestError::DuplicateTransfer {
                tx_id: transfer.tx_id,
                from: transfer.from,
                to: transfer.to,
            });
        }

        let seq = inner.log.len() as u64;
        inner.dedup.insert(key);
        inner.out_edges.entry(transfer.from).or_default().push(seq);
        inner.in_edges.entry(transfer.to).or_default().push(seq);
        inner
            .tx_legs
            .entry(transfer.tx_id.clone())
            .or_default()
            .push(seq);

        for addr in [transfer.from, transfer.to] {
            let record = inner
                .addresses
                .entry(addr)
                .or_insert_with(|| AddressRecord {
                    id: addr,
                    chain: transfer.chain.clone(),
                    first_seen: transfer.timestamp,
                    last_seen: transfer.timestamp,
                });
            record.first_seen = record.first_seen.min(transfer.timestamp);
            record.last_seen = record.last_seen.max(transfer.timestamp);
        }

        inner.log.push(Arc::new(transfer));
        let new_version = inner.log.len() as u64;
        drop(inner);

        self.version.store(new_version, Ordering::Release);
        Ok(())
    }

    /// Ingest a batch, returning a per-record outcome.
    ///
    /// A bad record never aborts the batch; rejections are logged and
    /// returned alongside the accepted ones.
    pub fn ingest_batch(
        &self,
        transfers: Vec<Transfer>,
    ) -> Vec<std::result::Result<(), IngestError>> {
        let mut results = Vec::with_capacity(transfers.len());
        let mut rejected = 0usize;
        for transfer in transfers {
            let result = self.ingest(transfer);
            if let Err(ref err) = result {
                rejected += 1;
                debug!(error = %err, "rejected transfer");
            }
            results.push(result);
        }
        if rejected > 0 {
            warn!(rejected, accepted = results.len() - rejected, "batch ingest completed with rejections");
        }
        results
    }

    /// Query transfers adjacent to an address under a snapshot.
    ///
    /// Returns `(seq, transfer)` pairs in log order, at most
    /// `query.limit` of them. Finite and restartable via
    /// `query.after_seq`.
    #[must_use]
    pub fn neighbors(
        &self,
        address: AddressId,
        query: NeighborQuery,
        at: GraphVersion,
    ) -> Vec<(u64, Arc<Transfer>)> {
        let inner = self.inner.read().expect("graph store lock poisoned");
        let min_seq = query.after_seq.map_or(0, |s| s + 1);

        let mut seqs: Vec<u64> = match query.direction {
            Direction::Outgoing => inner.out_edges.get(&address).cloned().unwrap_or_default(),
            Direction::Incoming => inner.in_edges.get(&address).cloned().unwrap_or_default(),
            Direction::Both => {
                let mut merged: Vec<u64> = inner
                    .out_edges
                    .get(&address)
                    .into_iter()
                    .chain(inner.in_edges.get(&address))
                    .flatten()
                    .copied()
                    .collect();
                merged.sort_unstable();
                merged.dedup();
                merged
            }
        };
        seqs.retain(|&s| s >= min_seq && s < at.0);

        seqs.into_iter()
            .filter_map(|seq| {
                let transfer = inner.log[seq as usize].clone();
                query.window.contains(transfer.timestamp).then_some((seq, transfer))
            })
            .take(query.limit)
            .collect()
    }

    /// Fetch the transfer at a log position under a snapshot.
    ///
    /// `None` when the position is at or beyond the snapshot — this is
    /// how evidence references are re-validated during reconstruction.
    #[must_use]
    pub fn transfer_at(&self, seq: u64, at: GraphVersion) -> Option<Arc<Transfer>> {
        if seq >= at.0 {
            return None;
        }
        let inner = self.inner.read().expect("graph store lock poisoned");
        inner.log.get(seq as usize).cloned()
    }

    /// All legs carried by a transaction id, in log order.
    ///
    /// Several legs under one `tx_id` model multi-input withdrawals; the
    /// clustering engine reads these for common-input ownership.
    #[must_use]
    pub fn legs_of_tx(&self, tx_id: &str, at: GraphVersion) -> Vec<(u64, Arc<Transfer>)> {
        let inner = self.inner.read().expect("graph store lock poisoned");
        inner
            .tx_legs
            .get(tx_id)
            .map(|seqs| {
                seqs.iter()
                    .filter(|&&s| s < at.0)
                    .map(|&s| (s, inner.log[s as usize].clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Per-address bookkeeping record.
    #[must_use]
    pub fn address(&self, id: AddressId) -> Option<AddressRecord> {
        let inner = self.inner.read().expect("graph store lock poisoned");
        inner.addresses.get(&id).cloned()
    }

    /// All address ids seen under a snapshot.
    #[must_use]
    pub fn addresses(&self, at: GraphVersion) -> Vec<AddressId> {
        let inner = self.inner.read().expect("graph store lock poisoned");
        let mut ids: HashSet<AddressId> = HashSet::new();
        for transfer in inner.log.iter().take(at.0 as usize) {
            ids.insert(transfer.from);
            ids.insert(transfer.to);
        }
        let mut ids: Vec<AddressId> = ids.into_iter().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of transfers in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.version.load(Ordering::Acquire) as usize
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Verify snapshot invariants for a version token.
    ///
    /// A version beyond the log length means a reader could observe
    /// transfers that do not exist; that is unrecoverable corruption.
    pub fn verify_snapshot(&self, at: GraphVersion) -> Result<()> {
        let inner = self.inner.read().expect("graph store lock poisoned");
        if at.0 as usize > inner.log.len() {
            return Err(EngineError::corruption(format!(
                "snapshot {at} exceeds log length {}",
                inner.log.len()
            )));
        }
        Ok(())
    }

    fn validate(transfer: &Transfer) -> std::result::Result<(), IngestError> {
        if transfer.tx_id.is_empty() {
            return Err(IngestError::MissingField { field: "tx_id" });
        }
        if transfer.chain.is_empty() {
            return Err(IngestError::MissingField { field: "chain" });
        }
        if transfer.asset.is_empty() {
            return Err(IngestError::MissingField { field: "asset" });
        }
        if !(transfer.amount > 0.0) || !transfer.amount.is_finite() {
            return Err(IngestError::NonPositiveAmount {
                tx_id: transfer.tx_id.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(tx_id: &str, from: AddressId, to: AddressId, amount: f64, ts: u64) -> Transfer {
        Transfer {
            tx_id: tx_id.to_string(),
            chain: "btc".to_string(),
            from,
            to,
            asset: "btc".to_string(),
            amount,
            converted_value: None,
            timestamp: ts,
            block_height: ts / 600,
        }
    }

    #[test]
    fn test_ingest_and_neighbors_completeness() {
        let store = GraphStore::new();
        store.ingest(transfer("t1", 1, 2, 10.0, 100)).unwrap();
        store.ingest(transfer("t2", 1, 3, 20.0, 200)).unwrap();
        store.ingest(transfer("t3", 4, 1, 5.0, 300)).unwrap();

        let at = store.snapshot();
        assert_eq!(at, GraphVersion(3));

        let out = store.neighbors(1, NeighborQuery::default(), at);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].1.tx_id, "t1");
        assert_eq!(out[1].1.tx_id, "t2");

        let incoming = store.neighbors(
            1,
            NeighborQuery {
                direction: Direction::Incoming,
                ..Default::default()
            },
            at,
        );
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].1.tx_id, "t3");

        let both = store.neighbors(
            1,
            NeighborQuery {
                direction: Direction::Both,
                ..Default::default()
            },
            at,
        );
        assert_eq!(both.len(), 3);
    }

    #[test]
    fn test_snapshot_isolation() {
        let store = GraphStore::new();
        store.ingest(transfer("t1", 1, 2, 10.0, 100)).unwrap();
        let at = store.snapshot();

        store.ingest(transfer("t2", 1, 3, 20.0, 200)).unwrap();

        // Reads at the old snapshot never observe the later append.
        let out = store.neighbors(1, NeighborQuery::default(), at);
        assert_eq!(out.len(), 1);
        assert!(store.transfer_at(1, at).is_none());
        assert!(store.transfer_at(1, store.snapshot()).is_some());
    }

    #[test]
    fn test_duplicate_rejected_not_overwritten() {
        let store = GraphStore::new();
        store.ingest(transfer("t1", 1, 2, 10.0, 100)).unwrap();
        let dup = store.ingest(transfer("t1", 1, 2, 99.0, 999));
        assert!(matches!(dup, Err(IngestError::DuplicateTransfer { .. })));

        let at = store.snapshot();
        assert_eq!(store.transfer_at(0, at).unwrap().amount, 10.0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_same_tx_distinct_legs_allowed() {
        let store = GraphStore::new();
        store.ingest(transfer("t1", 1, 9, 10.0, 100)).unwrap();
        store.ingest(transfer("t1", 2, 9, 15.0, 100)).unwrap();

        let legs = store.legs_of_tx("t1", store.snapshot());
        assert_eq!(legs.len(), 2);
    }

    #[test]
    fn test_batch_never_aborts_on_bad_record() {
        let store = GraphStore::new();
        let results = store.ingest_batch(vec![
            transfer("t1", 1, 2, 10.0, 100),
            transfer("", 1, 2, 10.0, 100),
            transfer("t2", 1, 2, -5.0, 100),
            transfer("t3", 1, 2, 7.0, 100),
        ]);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(IngestError::MissingField { field: "tx_id" })));
        assert!(matches!(results[2], Err(IngestError::NonPositiveAmount { .. })));
        assert!(results[3].is_ok());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_neighbor_cursor_restarts() {
        let store = GraphStore::new();
        for i in 0..10u64 {
            store
                .ingest(transfer(&format!("t{i}"), 1, 2 + i, 10.0, 100 + i))
                .unwrap();
        }
        let at = store.snapshot();

        let page1 = store.neighbors(
            1,
            NeighborQuery {
                limit: 4,
                ..Default::default()
            },
            at,
        );
        assert_eq!(page1.len(), 4);

        let page2 = store.neighbors(
            1,
            NeighborQuery {
                limit: 100,
                after_seq: Some(page1.last().unwrap().0),
                ..Default::default()
            },
            at,
        );
        assert_eq!(page2.len(), 6);
        assert!(page2[0].0 > page1[3].0);
    }

    #[test]
    fn test_time_window_filter() {
        let store = GraphStore::new();
        store.ingest(transfer("t1", 1, 2, 10.0, 100)).unwrap();
        store.ingest(transfer("t2", 1, 3, 10.0, 500)).unwrap();

        let filtered = store.neighbors(
            1,
            NeighborQuery {
                window: TimeWindow::new(400, 600),
                ..Default::default()
            },
            store.snapshot(),
        );
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].1.tx_id, "t2");
    }

    #[test]
    fn test_address_records_maintained() {
        let store = GraphStore::new();
        store.ingest(transfer("t1", 1, 2, 10.0, 100)).unwrap();
        store.ingest(transfer("t2", 3, 1, 10.0, 400)).unwrap();

        let record = store.address(1).unwrap();
        assert_eq!(record.first_seen, 100);
        assert_eq!(record.last_seen, 400);
    }

    #[test]
    fn test_verify_snapshot_catches_corruption() {
        let store = GraphStore::new();
        store.ingest(transfer("t1", 1, 2, 10.0, 100)).unwrap();
        assert!(store.verify_snapshot(GraphVersion(1)).is_ok());
        assert!(store.verify_snapshot(GraphVersion(2)).is_err());
    }
}
