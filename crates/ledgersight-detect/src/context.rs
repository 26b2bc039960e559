//! Detector trait, metadata, and shared detection context.

use async_trait::async_trait;
use ledgersight_core::config::DetectorConfig;
use ledgersight_core::error::Result;
use ledgersight_core::types::{
    AddressId, ClusterId, ClusterView, GraphVersion, PatternMatch, PatternType, Subject,
    TimeWindow,
};
use ledgersight_graph::{FlowTracer, GraphStore};
use std::sync::Arc;

/// Evidence chains are capped so a single pervasive pattern cannot
/// balloon a match into megabytes; the confidence already reflects the
/// full count.
pub const EVIDENCE_CAP: usize = 64;

/// Static description of a detector.
#[derive(Debug, Clone)]
pub struct DetectorMetadata {
    /// Stable identifier, `family/name` form.
    pub id: String,
    /// Pattern family the detector emits.
    pub pattern: PatternType,
    /// Human-readable description.
    pub description: String,
}

impl DetectorMetadata {
    /// Create metadata for a detector.
    #[must_use]
    pub fn new(id: impl Into<String>, pattern: PatternType) -> Self {
        Self {
            id: id.into(),
            pattern,
            description: String::new(),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Everything a detector needs to run against one pinned snapshot.
#[derive(Clone)]
pub struct DetectionContext {
    /// The transfer graph.
    pub store: Arc<GraphStore>,
    /// Flow tracer over the same store.
    pub tracer: Arc<FlowTracer>,
    /// Entity cluster view.
    pub clusters: Arc<dyn ClusterView>,
    /// Detector thresholds.
    pub config: DetectorConfig,
    /// Snapshot every read in this detection pass is pinned to.
    pub version: GraphVersion,
}

impl DetectionContext {
    /// Concrete addresses a subject expands to.
    #[must_use]
    pub fn subject_addresses(&self, subject: Subject) -> Vec<AddressId> {
        match subject {
            Subject::Address(a) => vec![a],
            Subject::Cluster(c) => self.clusters.members(c),
        }
    }

    /// Cluster of an address, falling back to the address itself as a
    /// singleton cluster.
    #[must_use]
    pub fn cluster_or_self(&self, address: AddressId) -> ClusterId {
        self.clusters.cluster_of(address).unwrap_or(address)
    }
}

/// A pluggable pattern detector.
///
/// Detectors are pure over `(context, subject, window)`: same snapshot,
/// same matches. A failing detector returns `Err` and never poisons the
/// rest of a detection pass.
#[async_trait]
pub trait PatternDetector: Send + Sync {
    /// Static metadata.
    fn metadata(&self) -> &DetectorMetadata;

    /// Detect pattern instances for a subject within a window.
    async fn detect(
        &self,
        ctx: &DetectionContext,
        subject: Subject,
        window: TimeWindow,
    ) -> Result<Vec<PatternMatch>>;
}
