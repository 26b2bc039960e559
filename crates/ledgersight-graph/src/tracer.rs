//! Bounded multi-hop flow tracing.
//!
//! Breadth-first expansion per hop over a pinned graph snapshot. Each
//! path carries its own visited set, so no single path revisits an
//! address while distinct paths may pass through the same one. Branches
//! are pruned once their accumulated value falls below a fraction of the
//! origin value; cross-asset and cross-chain hops are normalized through
//! the external [`ValueConverter`], and a converter miss marks the
//! branch `unconverted` instead of dropping it.
//!
//! Budget exhaustion — deadline, hop budget with a live frontier, or the
//! path cap — yields a partial result flagged `truncated`, never an
//! error.

use crate::store::{GraphStore, NeighborQuery};
use ledgersight_core::collaborators::ValueConverter;
use ledgersight_core::config::TracerConfig;
use ledgersight_core::types::{
    AddressId, ClusterView, Direction, GraphVersion, Subject, TimeWindow,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Parameters for one trace.
#[derive(Debug, Clone)]
pub struct TraceRequest {
    /// Origin address or cluster.
    pub source: Subject,
    /// Fixed target; `None` traces all value reachable within budget.
    pub target: Option<AddressId>,
    /// Maximum hop count.
    pub max_hops: u32,
    /// Prune a branch once its value drops below this fraction of the
    /// origin value. Unconverted branches are never pruned by value,
    /// since their decay cannot be measured.
    pub min_value_fraction: f64,
    /// Event-time window every hop must fall within.
    pub window: TimeWindow,
    /// Wall-clock budget for the search.
    pub deadline: Option<Duration>,
}

impl TraceRequest {
    /// Trace from an address with config defaults.
    #[must_use]
    pub fn from_address(source: AddressId, config: &TracerConfig) -> Self {
        Self {
            source: Subject::Address(source),
            target: None,
            max_hops: config.default_max_hops,
            min_value_fraction: config.default_min_value_fraction,
            window: TimeWindow::all(),
            deadline: None,
        }
    }
}

/// One traversed edge on a traced path.
#[derive(Debug, Clone, PartialEq)]
pub struct TracedHop {
    /// Log sequence of the underlying transfer (evidence reference).
    pub seq: u64,
    /// Transaction id.
    pub tx_id: String,
    /// Sending address.
    pub from: AddressId,
    /// Receiving address.
    pub to: AddressId,
    /// Chain of the hop.
    pub chain: String,
    /// Asset of the hop.
    pub asset: String,
    /// Raw amount of the hop.
    pub amount: f64,
    /// Amount normalized to origin units, when conversion succeeded.
    pub converted: Option<f64>,
}

/// A complete traced path from the origin.
#[derive(Debug, Clone)]
pub struct TracedPath {
    /// Ordered hops from the origin.
    pub hops: Vec<TracedHop>,
    /// Terminal address of the path.
    pub terminal: AddressId,
    /// Value surviving at the terminal in origin units; `None` when the
    /// path contains unconverted segments (conservative: never summed
    /// into converted totals).
    pub converted_total: Option<f64>,
    /// Fraction of the origin value surviving at the terminal, when
    /// measurable.
    pub fraction_remaining: Option<f64>,
    /// Whether any hop could not be normalized.
    pub unconverted: bool,
}

/// Result of a trace. Partial results are valid and flagged.
#[derive(Debug, Clone)]
pub struct TraceResult {
    /// Origin of the trace.
    pub source: Subject,
    /// Discovered paths. Empty when nothing is reachable — not an error.
    pub paths: Vec<TracedPath>,
    /// True when a budget (deadline, hop, or path cap) cut the search
    /// short.
    pub truncated: bool,
    /// Snapshot the trace ran against.
    pub graph_version: GraphVersion,
}

struct PathState {
    addr: AddressId,
    visited: HashSet<AddressId>,
    hops: Vec<TracedHop>,
    // Best-known surviving value in origin units.
    value: f64,
    origin_value: f64,
    origin_asset: String,
    origin_chain: String,
    unconverted: bool,
    last_ts: u64,
}

impl PathState {
    fn into_path(self) -> TracedPath {
        TracedPath {
            terminal: self.addr,
            converted_total: (!self.unconverted).then_some(self.value),
            fraction_remaining: (!self.unconverted && self.origin_value > 0.0)
                .then(|| self.value / self.origin_value),
            unconverted: self.unconverted,
            hops: self.hops,
        }
    }
}

/// Bounded multi-hop path search over the graph store.
pub struct FlowTracer {
    store: Arc<GraphStore>,
    converter: Arc<dyn ValueConverter>,
    config: TracerConfig,
}

impl FlowTracer {
    /// Create a tracer over a store and converter.
    #[must_use]
    pub fn new(
        store: Arc<GraphStore>,
        converter: Arc<dyn ValueConverter>,
        config: TracerConfig,
    ) -> Self {
        Self {
            store,
            converter,
            config,
        }
    }

    /// Run a trace against a snapshot.
    ///
    /// `clusters` resolves cluster sources to their member addresses; a
    /// cluster origin expands from every member.
    pub async fn trace(
        &self,
        request: &TraceRequest,
        at: GraphVersion,
        clusters: Option<&dyn ClusterView>,
    ) -> TraceResult {
        let started = Instant::now();
        let sources: Vec<AddressId> = match request.source {
            Subject::Address(a) => vec![a],
            Subject::Cluster(c) => clusters.map(|v| v.members(c)).unwrap_or_default(),
        };

        let mut frontier: Vec<PathState> = sources
            .into_iter()
            .map(|addr| PathState {
                addr,
                visited: HashSet::from([addr]),
                hops: Vec::new(),
                value: 0.0,
                origin_value: 0.0,
                origin_asset: String::new(),
                origin_chain: String::new(),
                unconverted: false,
                last_ts: 0,
            })
            .collect();

        let mut paths: Vec<TracedPath> = Vec::new();
        let mut truncated = false;

        'search: for _depth in 0..request.max_hops {
            if frontier.is_empty() {
                break;
            }
            let mut next_frontier: Vec<PathState> = Vec::new();

            for state in frontier.drain(..) {
                if self.over_deadline(started, request.deadline) {
                    truncated = true;
                    // Flush in-flight states as partial paths.
                    if !state.hops.is_empty() && request.target.is_none() {
                        paths.push(state.into_path());
                    }
                    continue;
                }

                let edges = self.admissible_edges(&state, request, at);
                let mut extended = false;

                for (seq, transfer) in edges {
                    if paths.len() >= self.config.max_paths {
                        truncated = true;
                        break 'search;
                    }
                    if next_frontier.len() >= self.config.max_frontier {
                        truncated = true;
                        break;
                    }

                    let next = self
                        .extend(&state, seq, transfer.as_ref(), request.window.end)
                        .await;
                    let Some(next) = next else { continue };

                    // Value dilution cutoff, only where decay is measurable.
                    if !next.unconverted
                        && next.origin_value > 0.0
                        && next.value / next.origin_value < request.min_value_fraction
                    {
                        continue;
                    }

                    extended = true;
                    if request.target == Some(next.addr) {
                        paths.push(next.into_path());
                    } else {
                        next_frontier.push(next);
                    }
                }

                if !extended && !state.hops.is_empty() && request.target.is_none() {
                    paths.push(state.into_path());
                }
            }

            frontier = next_frontier;
        }

        // Hop budget ended with a live frontier: record what we have and
        // flag truncation if any of it could still have been extended.
        if !frontier.is_empty() {
            let mut could_extend = false;
            for state in frontier {
                if !could_extend && self.has_admissible_edge(&state, request, at) {
                    could_extend = true;
                }
                if !state.hops.is_empty() && request.target.is_none() {
                    paths.push(state.into_path());
                }
            }
            truncated |= could_extend;
        }

        debug!(
            source = %request.source,
            paths = paths.len(),
            truncated,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "trace completed"
        );

        TraceResult {
            source: request.source,
            paths,
            truncated,
            graph_version: at,
        }
    }

    fn over_deadline(&self, started: Instant, deadline: Option<Duration>) -> bool {
        deadline.is_some_and(|d| started.elapsed() >= d)
    }

    fn admissible_edges(
        &self,
        state: &PathState,
        request: &TraceRequest,
        at: GraphVersion,
    ) -> Vec<(u64, Arc<ledgersight_core::types::Transfer>)> {
        self.store
            .neighbors(
                state.addr,
                NeighborQuery {
                    direction: Direction::Outgoing,
                    window: request.window,
                    limit: self.config.max_frontier,
                    after_seq: None,
                },
                at,
            )
            .into_iter()
            .filter(|(_, t)| t.timestamp >= state.last_ts && !state.visited.contains(&t.to))
            .collect()
    }

    fn has_admissible_edge(
        &self,
        state: &PathState,
        request: &TraceRequest,
        at: GraphVersion,
    ) -> bool {
        !self.admissible_edges(state, request, at).is_empty()
    }

    async fn extend(
        &self,
        state: &PathState,
        seq: u64,
        transfer: &ledgersight_core::types::Transfer,
        _window_end: u64,
    ) -> Option<PathState> {
        let is_first_hop = state.hops.is_empty();

        let (hop_value, mut unconverted) = if is_first_hop
            || (transfer.asset == state.origin_asset && transfer.chain == state.origin_chain)
        {
            (Some(transfer.amount), state.unconverted)
        } else {
            match self
                .converter
                .convert(
                    &transfer.asset,
                    transfer.amount,
                    &transfer.chain,
                    &state.origin_chain,
                    transfer.timestamp,
                )
                .await
            {
                Some(v) => (Some(v), state.unconverted),
                None => (None, true),
            }
        };

        let (origin_asset, origin_chain, origin_value) = if is_first_hop {
            (
                transfer.asset.clone(),
                transfer.chain.clone(),
                transfer.amount,
            )
        } else {
            (
                state.origin_asset.clone(),
                state.origin_chain.clone(),
                state.origin_value,
            )
        };

        // Surviving value cannot exceed what arrived on the previous hop.
        let value = match hop_value {
            Some(v) if is_first_hop => v,
            Some(v) => v.min(state.value),
            None => {
                unconverted = true;
                state.value
            }
        };

        let mut visited = state.visited.clone();
        visited.insert(transfer.to);
        let mut hops = state.hops.clone();
        hops.push(TracedHop {
            seq,
            tx_id: transfer.tx_id.clone(),
            from: transfer.from,
            to: transfer.to,
            chain: transfer.chain.clone(),
            asset: transfer.asset.clone(),
            amount: transfer.amount,
            converted: hop_value,
        });

        Some(PathState {
            addr: transfer.to,
            visited,
            hops,
            value,
            origin_value,
            origin_asset,
            origin_chain,
            unconverted,
            last_ts: transfer.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ledgersight_core::types::Transfer;

    struct FixedRateConverter(f64);

    #[async_trait]
    impl ValueConverter for FixedRateConverter {
        async fn convert(
            &self,
            _asset: &str,
            amount: f64,
            _chain_from: &str,
            _chain_to: &str,
            _at_time: u64,
        ) -> Option<f64> {
            Some(amount * self.0)
        }
    }

    struct SlowConverter {
        delay: Duration,
    }

    #[async_trait]
    impl ValueConverter for SlowConverter {
        async fn convert(&self, _: &str, amount: f64, _: &str, _: &str, _: u64) -> Option<f64> {
            std::thread::sleep(self.delay);
            Some(amount)
        }
    }

    struct UnavailableConverter;

    #[async_trait]
    impl ValueConverter for UnavailableConverter {
        async fn convert(&self, _: &str, _: f64, _: &str, _: &str, _: u64) -> Option<f64> {
            None
        }
    }

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
            block_height: ts / 600,
        }
    }

    fn chain_transfer(
        tx_id: &str,
        from: u64,
        to: u64,
        amount: f64,
        ts: u64,
        chain: &str,
        asset: &str,
    ) -> Transfer {
        Transfer {
            chain: chain.to_string(),
            asset: asset.to_string(),
            ..transfer(tx_id, from, to, amount, ts)
        }
    }

    fn tracer_over(store: Arc<GraphStore>, converter: Arc<dyn ValueConverter>) -> FlowTracer {
        FlowTracer::new(store, converter, TracerConfig::default())
    }

    fn request(source: u64, target: Option<u64>, max_hops: u32) -> TraceRequest {
        TraceRequest {
            source: Subject::Address(source),
            target,
            max_hops,
            min_value_fraction: 0.01,
            window: TimeWindow::all(),
            deadline: None,
        }
    }

    #[tokio::test]
    async fn test_trace_to_target() {
        let store = Arc::new(GraphStore::new());
        store.ingest(transfer("t1", 1, 2, 100.0, 100)).unwrap();
        store.ingest(transfer("t2", 2, 3, 95.0, 200)).unwrap();
        store.ingest(transfer("t3", 3, 4, 90.0, 300)).unwrap();
        let at = store.snapshot();

        let tracer = tracer_over(store, Arc::new(FixedRateConverter(1.0)));
        let result = tracer.trace(&request(1, Some(4), 5), at, None).await;

        assert_eq!(result.paths.len(), 1);
        assert_eq!(result.paths[0].hops.len(), 3);
        assert_eq!(result.paths[0].terminal, 4);
        assert_eq!(result.paths[0].converted_total, Some(90.0));
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn test_no_path_returns_empty_not_error() {
        let store = Arc::new(GraphStore::new());
        store.ingest(transfer("t1", 1, 2, 100.0, 100)).unwrap();
        store.ingest(transfer("t2", 5, 6, 100.0, 100)).unwrap();
        let at = store.snapshot();

        let tracer = tracer_over(store, Arc::new(FixedRateConverter(1.0)));
        let result = tracer.trace(&request(1, Some(6), 5), at, None).await;

        assert!(result.paths.is_empty());
    }

    #[tokio::test]
    async fn test_per_path_cycle_avoidance() {
        let store = Arc::new(GraphStore::new());
        store.ingest(transfer("t1", 1, 2, 100.0, 100)).unwrap();
        store.ingest(transfer("t2", 2, 1, 95.0, 200)).unwrap();
        store.ingest(transfer("t3", 2, 3, 95.0, 200)).unwrap();
        let at = store.snapshot();

        let tracer = tracer_over(store, Arc::new(FixedRateConverter(1.0)));
        let result = tracer.trace(&request(1, None, 5), at, None).await;

        // The 2 -> 1 edge must never be taken (1 is on the path).
        for path in &result.paths {
            let mut seen = HashSet::new();
            seen.insert(1u64);
            for hop in &path.hops {
                assert!(seen.insert(hop.to), "path revisited {}", hop.to);
            }
        }
    }

    #[tokio::test]
    async fn test_value_fraction_pruning() {
        let store = Arc::new(GraphStore::new());
        store.ingest(transfer("t1", 1, 2, 100.0, 100)).unwrap();
        // Dust split: below a 10% fraction of origin, must be pruned.
        store.ingest(transfer("t2", 2, 3, 2.0, 200)).unwrap();
        store.ingest(transfer("t3", 2, 4, 93.0, 200)).unwrap();
        let at = store.snapshot();

        let tracer = tracer_over(store, Arc::new(FixedRateConverter(1.0)));
        let mut req = request(1, None, 5);
        req.min_value_fraction = 0.10;
        let result = tracer.trace(&req, at, None).await;

        assert!(result.paths.iter().all(|p| p.terminal != 3));
        assert!(result.paths.iter().any(|p| p.terminal == 4));
    }

    #[tokio::test]
    async fn test_unconverted_branch_kept_not_summed() {
        let store = Arc::new(GraphStore::new());
        store.ingest(transfer("t1", 1, 2, 100.0, 100)).unwrap();
        store
            .ingest(chain_transfer("t2", 2, 3, 90.0, 200, "eth", "eth"))
            .unwrap();
        let at = store.snapshot();

        let tracer = tracer_over(store, Arc::new(UnavailableConverter));
        let result = tracer.trace(&request(1, None, 5), at, None).await;

        let cross = result
            .paths
            .iter()
            .find(|p| p.terminal == 3)
            .expect("unconverted branch must be kept");
        assert!(cross.unconverted);
        assert_eq!(cross.converted_total, None);
    }

    #[tokio::test]
    async fn test_zero_deadline_returns_truncated_partial() {
        let store = Arc::new(GraphStore::new());
        let mut prev = 1u64;
        for i in 0..50u64 {
            store
                .ingest(transfer(&format!("t{i}"), prev, prev + 1, 100.0, 100 + i))
                .unwrap();
            prev += 1;
        }
        let at = store.snapshot();

        let tracer = tracer_over(store, Arc::new(FixedRateConverter(1.0)));
        let mut req = request(1, None, 40);
        req.deadline = Some(Duration::ZERO);
        let result = tracer.trace(&req, at, None).await;

        assert!(result.truncated);
    }

    #[tokio::test]
    async fn test_tight_deadline_yields_partial_paths() {
        let store = Arc::new(GraphStore::new());
        store.ingest(transfer("t0", 1, 2, 100.0, 100)).unwrap();
        // Every hop past the first crosses chains, so each costs one
        // slow converter call.
        for i in 0..5u64 {
            store
                .ingest(chain_transfer(
                    &format!("t{}", i + 1),
                    i + 2,
                    i + 3,
                    90.0 - i as f64,
                    200 + i,
                    "eth",
                    "eth",
                ))
                .unwrap();
        }
        let at = store.snapshot();

        let tracer = tracer_over(
            store,
            Arc::new(SlowConverter {
                delay: Duration::from_millis(30),
            }),
        );
        let mut req = request(1, None, 10);
        req.deadline = Some(Duration::from_millis(50));
        let result = tracer.trace(&req, at, None).await;

        // The deadline trips mid-chain; what was reached so far comes
        // back as partial paths, not an empty result.
        assert!(result.truncated);
        assert!(!result.paths.is_empty());
        assert!(result.paths.iter().all(|p| !p.hops.is_empty()));
    }

    #[tokio::test]
    async fn test_hop_budget_truncation_flagged() {
        let store = Arc::new(GraphStore::new());
        for i in 0..6u64 {
            store
                .ingest(transfer(&format!("t{i}"), i + 1, i + 2, 100.0, 100 + i))
                .unwrap();
        }
        let at = store.snapshot();

        let tracer = tracer_over(store, Arc::new(FixedRateConverter(1.0)));
        let result = tracer.trace(&request(1, None, 3), at, None).await;

        assert!(result.truncated);
        assert!(!result.paths.is_empty());
        assert!(result.paths.iter().all(|p| p.hops.len() <= 3));
    }
}
