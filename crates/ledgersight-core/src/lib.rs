//! # Ledgersight Core
//!
//! Core abstractions for the Ledgersight transfer-analysis engine.
//!
//! This crate provides:
//! - Domain types shared by every engine component (transfers, subjects,
//!   pattern matches, risk assessments, graph versions)
//! - The engine-wide error taxonomy
//! - Unified configuration with startup validation
//! - Structured logging setup
//! - Trait seams for external collaborators (price oracle, sanctions
//!   screening, notification sink)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collaborators;
pub mod config;
pub mod error;
pub mod logging;
pub mod types;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::collaborators::{
        AlertPayload, NotificationSink, SanctionsScreen, ValueConverter,
    };
    pub use crate::config::{
        AlertRetryConfig, CacheConfig, ClusteringConfig, DetectorConfig, EngineConfig,
        OverflowPolicy, PipelineConfig, RiskConfig, TracerConfig,
    };
    pub use crate::error::{ClusteringConflict, EngineError, IngestError, Result};
    pub use crate::logging::LogConfig;
    pub use crate::types::{
        AddressId, AddressRecord, ClusterId, ClusterView, Direction, EvidenceRef, ExternalSignal,
        GraphVersion, PatternMatch, PatternType, RiskAssessment, RiskFactor, RiskLevel,
        SignalKind, Subject, TimeWindow, Transfer,
    };
}
