//! Blockchain transfer-analysis intelligence engine.
//!
//! Ingests normalized transfer events and continuously answers three
//! questions: which addresses share a controller, where value went
//! after N hops, and whether activity matches a known laundering
//! pattern and how risky the subject is as a result.
//!
//! [`Engine`] is the synchronous-query facade; [`Pipeline`] runs the
//! staged ingestion-to-alerting flow on background tasks with bounded
//! queues.
//!
//! # Example
//!
//! ```rust,ignore
//! use ledgersight::prelude::*;
//!
//! let engine = Engine::new(EngineConfig::from_env()?, converter, sanctions, sink, rules)?;
//! engine.ingest(transfer)?;
//! let assessment = engine.assess(Subject::Address(42)).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod pipeline;

pub use engine::{AlertFilter, Engine};
pub use pipeline::{Pipeline, PipelineMetrics};

/// Commonly used types, re-exported.
pub mod prelude {
    pub use crate::engine::{AlertFilter, Engine};
    pub use crate::pipeline::{Pipeline, PipelineMetrics};
    pub use ledgersight_alert::{Alert, AlertCondition, AlertRule, AlertStatus};
    pub use ledgersight_cache::SingleFlightCache;
    pub use ledgersight_cluster::{ClusterEngine, MergeOutcome, MergeReason};
    pub use ledgersight_core::collaborators::{
        AlertPayload, NotificationSink, SanctionsScreen, ValueConverter,
    };
    pub use ledgersight_core::config::EngineConfig;
    pub use ledgersight_core::error::{EngineError, IngestError, Result};
    pub use ledgersight_core::types::*;
    pub use ledgersight_detect::DetectorRegistry;
    pub use ledgersight_graph::{
        FlowTracer, GraphStore, TraceRequest, TraceResult, TracedHop, TracedPath,
    };
    pub use ledgersight_risk::{AssessmentStore, RiskScorer};
}
