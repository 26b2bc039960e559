//! Shared domain types.
//!
//! Addresses and transfers are identified by compact integer ids assigned
//! by the (external) chain collectors; chains and assets travel as short
//! symbolic strings ("btc", "eth", "usdc"). Event time is Unix epoch
//! seconds throughout; wall-clock audit timestamps use [`chrono`].

use serde::{Deserialize, Serialize};

/// Address identifier, unique across all chains.
pub type AddressId = u64;

/// Cluster (entity) identifier.
pub type ClusterId = u64;

// ============================================================================
// Graph primitives
// ============================================================================

/// A normalized transfer event (a directed edge in the transfer graph).
///
/// Immutable once ingested. One `tx_id` may carry several `(from, to)`
/// legs, e.g. a multi-input withdrawal; the duplicate key is the full
/// `(tx_id, from, to)` triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    /// On-chain transaction id (hash).
    pub tx_id: String,
    /// Chain the transfer occurred on.
    pub chain: String,
    /// Sending address.
    pub from: AddressId,
    /// Receiving address.
    pub to: AddressId,
    /// Asset symbol.
    pub asset: String,
    /// Amount in asset units.
    pub amount: f64,
    /// Amount normalized to the reference currency at ingest time, if the
    /// collector supplied one.
    pub converted_value: Option<f64>,
    /// Event timestamp (Unix epoch seconds).
    pub timestamp: u64,
    /// Block height on the source chain.
    pub block_height: u64,
}

/// Per-address bookkeeping maintained by the graph store.
///
/// Created on the first transfer referencing the address; never deleted.
/// Cluster membership is owned by the clustering engine, not stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressRecord {
    /// Address id.
    pub id: AddressId,
    /// Chain the address was first seen on.
    pub chain: String,
    /// Timestamp of the first transfer touching this address.
    pub first_seen: u64,
    /// Timestamp of the most recent transfer touching this address.
    pub last_seen: u64,
}

/// Edge direction for neighbor queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Transfers leaving the address.
    Outgoing,
    /// Transfers arriving at the address.
    Incoming,
    /// Both directions.
    Both,
}

/// Time window for analysis. Start inclusive, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start timestamp (inclusive).
    pub start: u64,
    /// End timestamp (exclusive).
    pub end: u64,
}

impl TimeWindow {
    /// Create a new time window.
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Window covering all of time.
    #[must_use]
    pub fn all() -> Self {
        Self {
            start: 0,
            end: u64::MAX,
        }
    }

    /// Check if a timestamp falls within this window.
    #[must_use]
    pub fn contains(&self, timestamp: u64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Window duration in seconds.
    #[must_use]
    pub fn duration(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

/// Monotonic snapshot token over the append-only transfer log.
///
/// A version `v` denotes "the first `v` transfers ingested". Reads pinned
/// to a version never observe later appends.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct GraphVersion(pub u64);

impl std::fmt::Display for GraphVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// ============================================================================
// Subjects and pattern matches
// ============================================================================

/// The subject of an analysis result: a single address or a whole cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    /// A single address.
    Address(AddressId),
    /// A cluster of addresses under one presumed controller.
    Cluster(ClusterId),
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Address(id) => write!(f, "address/{id}"),
            Self::Cluster(id) => write!(f, "cluster/{id}"),
        }
    }
}

/// Laundering/structuring pattern families recognized by the detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Value passed hop-to-hop with a small peel split off at each step.
    PeelingChain,
    /// Many sub-threshold transfers summing above a reporting threshold.
    Structuring,
    /// High fan-in/fan-out through one address with balanced value.
    Mixing,
    /// Repeated hop-through across distinct intermediary clusters.
    Layering,
    /// Traced path crossing multiple chains in a short window.
    CrossChainHop,
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeelingChain => write!(f, "peeling-chain"),
            Self::Structuring => write!(f, "structuring"),
            Self::Mixing => write!(f, "mixing"),
            Self::Layering => write!(f, "layering"),
            Self::CrossChainHop => write!(f, "cross-chain-hop"),
        }
    }
}

/// Reference to a transfer in the append-only log.
///
/// `seq` is the log position, so the referenced edge can be reproduced
/// exactly from any snapshot at or after the version the match was
/// computed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    /// Log sequence number of the transfer.
    pub seq: u64,
    /// Transaction id, for human-readable audit output.
    pub tx_id: String,
}

/// A detected suspicious pattern with its full evidence chain.
///
/// Evidence references only transfers present in the graph snapshot the
/// match was computed against (`graph_version`), never summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMatch {
    /// Pattern family.
    pub pattern: PatternType,
    /// Subject the pattern concerns.
    pub subject: Subject,
    /// Detector confidence in [0, 1].
    pub confidence: f64,
    /// Ordered transfer references constituting the evidence chain.
    pub evidence: Vec<EvidenceRef>,
    /// Time window the pattern spans.
    pub window: TimeWindow,
    /// Snapshot the match was computed against.
    pub graph_version: GraphVersion,
}

// ============================================================================
// Risk types
// ============================================================================

/// Discrete risk level derived from the numeric score.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    /// No meaningful indicators.
    Low,
    /// Some indicators, routine review.
    Medium,
    /// Strong indicators, priority review.
    High,
    /// Sanctions hit or overwhelming indicators.
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Kinds of externally sourced screening signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Subject appears on a sanctions list. Forces CRITICAL.
    SanctionsHit,
    /// Subject appears on a non-sanctions watchlist.
    Watchlist,
    /// Subject is a labeled exchange/service deposit address.
    ExchangeLabel,
}

/// A signal obtained from an external screening service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalSignal {
    /// Signal kind.
    pub kind: SignalKind,
    /// Originating list or provider.
    pub source: String,
    /// When the signal was observed (epoch seconds).
    pub observed_at: u64,
}

/// One weighted contribution to a risk score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskFactor {
    /// A pattern match contribution.
    Pattern {
        /// Pattern family.
        pattern: PatternType,
        /// Detector confidence.
        confidence: f64,
        /// Effective weight applied (after diminishing returns).
        weight: f64,
    },
    /// An external signal contribution.
    Signal {
        /// Signal kind.
        signal: SignalKind,
        /// Originating source.
        source: String,
        /// Weight applied.
        weight: f64,
    },
}

/// A versioned risk assessment for a subject.
///
/// Recomputation is a pure function of `(subject, graph_version,
/// external signals)`; superseded assessments remain queryable by
/// version for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Assessed subject.
    pub subject: Subject,
    /// Score in [0, 100].
    pub score: f64,
    /// Discrete level derived from the score (or pinned by sanctions).
    pub level: RiskLevel,
    /// Everything that contributed to the score, with applied weights.
    pub contributing_factors: Vec<RiskFactor>,
    /// Graph snapshot the assessment was computed against.
    pub graph_version: GraphVersion,
    /// Wall-clock computation time.
    pub computed_at: chrono::DateTime<chrono::Utc>,
}

// ============================================================================
// Cluster view seam
// ============================================================================

/// Read-only view of the current entity partition.
///
/// Implemented by the clustering engine; consumed by the flow tracer and
/// detectors, which must never mutate cluster state.
pub trait ClusterView: Send + Sync {
    /// Cluster the address currently belongs to, if it has been seen.
    fn cluster_of(&self, address: AddressId) -> Option<ClusterId>;

    /// Member addresses of a cluster. Empty if the cluster is unknown.
    fn members(&self, cluster: ClusterId) -> Vec<AddressId>;
}
