//! Unified engine configuration.
//!
//! Every tunable threshold and weight in the engine lives here, not in
//! the components that consume it: detectors and the risk scorer are
//! policy-free. Configuration errors are fatal at startup — an engine
//! with missing thresholds silently mis-scoring is worse than one that
//! refuses to boot.
//!
//! # Example
//!
//! ```rust,ignore
//! use ledgersight_core::config::EngineConfig;
//!
//! let config = EngineConfig::from_env()?;
//! config.validate()?;
//! ```

use crate::error::{EngineError, Result};
use crate::types::PatternType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

// ============================================================================
// Clustering
// ============================================================================

/// Clustering engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Combined-confidence threshold a merge must exceed to execute.
    pub merge_threshold: f64,
    /// Confidence assigned to common-input ownership evidence.
    pub common_input_confidence: f64,
    /// Confidence assigned to peeling-chain continuation evidence.
    pub peel_continuation_confidence: f64,
    /// Confidence assigned to temporal/behavioral similarity evidence.
    pub temporal_similarity_confidence: f64,
    /// Minimum shared counterparties for temporal similarity to apply.
    pub min_shared_counterparties: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            merge_threshold: 0.75,
            common_input_confidence: 0.9,
            peel_continuation_confidence: 0.6,
            temporal_similarity_confidence: 0.4,
            min_shared_counterparties: 3,
        }
    }
}

// ============================================================================
// Flow tracer
// ============================================================================

/// Flow tracer configuration (defaults; per-request parameters override).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracerConfig {
    /// Default maximum hop count.
    pub default_max_hops: u32,
    /// Stop following a branch once its accumulated value drops below
    /// this fraction of the origin value.
    pub default_min_value_fraction: f64,
    /// Hard cap on paths returned by a single trace.
    pub max_paths: usize,
    /// Hard cap on frontier size per hop, bounding memory.
    pub max_frontier: usize,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            default_max_hops: 6,
            default_min_value_fraction: 0.01,
            max_paths: 1_000,
            max_frontier: 50_000,
        }
    }
}

// ============================================================================
// Detectors
// ============================================================================

/// Peeling-chain detector parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeelingConfig {
    /// Minimum chain length in hops.
    pub min_hops: u32,
    /// Lower bound of the per-hop retention band.
    pub decay_low: f64,
    /// Upper bound of the per-hop retention band.
    pub decay_high: f64,
}

impl Default for PeelingConfig {
    fn default() -> Self {
        Self {
            min_hops: 3,
            decay_low: 0.80,
            decay_high: 0.98,
        }
    }
}

/// Structuring detector parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuringConfig {
    /// Reporting threshold the subject appears to be evading.
    pub reporting_threshold: f64,
    /// Rolling window length in seconds.
    pub window_secs: u64,
    /// Minimum number of sub-threshold transfers.
    pub min_count: usize,
}

impl Default for StructuringConfig {
    fn default() -> Self {
        Self {
            reporting_threshold: 10_000.0,
            window_secs: 86_400,
            min_count: 3,
        }
    }
}

/// Mixing/tumbling detector parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixingConfig {
    /// Minimum distinct counterparties on each side within the window.
    pub min_fan: usize,
    /// Window length in seconds.
    pub window_secs: u64,
    /// Maximum relative in/out imbalance for "value normalization".
    pub balance_tolerance: f64,
    /// Fan must exceed the historical baseline by this factor.
    pub baseline_factor: f64,
}

impl Default for MixingConfig {
    fn default() -> Self {
        Self {
            min_fan: 5,
            window_secs: 3_600,
            balance_tolerance: 0.15,
            baseline_factor: 3.0,
        }
    }
}

/// Layering detector parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayeringConfig {
    /// Minimum distinct intermediate clusters on the path.
    pub min_intermediates: usize,
    /// Maximum value fraction an intermediate may retain.
    pub max_retention_fraction: f64,
    /// Maximum seconds between the first and last hop of a qualifying
    /// chain.
    pub window_secs: u64,
}

impl Default for LayeringConfig {
    fn default() -> Self {
        Self {
            min_intermediates: 3,
            max_retention_fraction: 0.05,
            window_secs: 86_400,
        }
    }
}

/// Cross-chain hopping detector parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Minimum distinct chains the path must cross.
    pub min_chains: usize,
    /// Window length in seconds.
    pub window_secs: u64,
    /// Confidence multiplier applied when unconverted segments are
    /// present on the path.
    pub unconverted_penalty: f64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            min_chains: 2,
            window_secs: 21_600,
            unconverted_penalty: 0.6,
        }
    }
}

/// Aggregated detector configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Peeling-chain parameters.
    pub peeling: PeelingConfig,
    /// Structuring parameters.
    pub structuring: StructuringConfig,
    /// Mixing parameters.
    pub mixing: MixingConfig,
    /// Layering parameters.
    pub layering: LayeringConfig,
    /// Cross-chain hopping parameters.
    pub bridge: BridgeConfig,
}

// ============================================================================
// Risk scoring
// ============================================================================

/// Risk scorer configuration. Weights live here, never in detectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Weight per pattern family (score points at confidence 1.0).
    pub pattern_weights: HashMap<PatternType, f64>,
    /// Weight applied to non-sanctions watchlist signals.
    pub watchlist_weight: f64,
    /// Multiplier applied to each repeat match of the same pattern type
    /// (diminishing returns; avoids double-counting one behavior).
    pub diminishing_factor: f64,
    /// Score at or above which the level is MEDIUM.
    pub medium_floor: f64,
    /// Score at or above which the level is HIGH.
    pub high_floor: f64,
    /// Score at or above which the level is CRITICAL.
    pub critical_floor: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        let mut pattern_weights = HashMap::new();
        pattern_weights.insert(PatternType::PeelingChain, 30.0);
        pattern_weights.insert(PatternType::Structuring, 35.0);
        pattern_weights.insert(PatternType::Mixing, 30.0);
        pattern_weights.insert(PatternType::Layering, 25.0);
        pattern_weights.insert(PatternType::CrossChainHop, 20.0);

        Self {
            pattern_weights,
            watchlist_weight: 15.0,
            diminishing_factor: 0.6,
            medium_floor: 25.0,
            high_floor: 50.0,
            critical_floor: 75.0,
        }
    }
}

// ============================================================================
// Cache, alerting, pipeline
// ============================================================================

/// Computation cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of retained entries before pruning.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 10_000 }
    }
}

/// Alert delivery retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRetryConfig {
    /// Maximum delivery attempts (including the first).
    pub max_attempts: u32,
    /// Initial backoff delay.
    pub initial_delay: Duration,
    /// Cap on the backoff delay.
    pub max_delay: Duration,
    /// Exponential backoff factor.
    pub backoff_factor: f64,
    /// Overall deadline; the alert is marked `delivery_failed` once this
    /// elapses regardless of remaining attempts.
    pub overall_deadline: Duration,
}

impl Default for AlertRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            overall_deadline: Duration::from_secs(60),
        }
    }
}

/// Policy applied when an inter-stage queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Block the producer until capacity frees up (no event loss).
    Block,
    /// Drop the work item and count it (best-effort passes only).
    DropWithMetric,
}

/// Staged pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Ingestion queue capacity.
    pub ingest_capacity: usize,
    /// Clustering queue capacity.
    pub cluster_capacity: usize,
    /// Detection queue capacity.
    pub detect_capacity: usize,
    /// Scoring queue capacity.
    pub score_capacity: usize,
    /// Alerting queue capacity.
    pub alert_capacity: usize,
    /// Policy for the ingestion producer. Ingestion must not lose
    /// events, so anything other than `Block` is rejected by `validate`.
    pub ingest_overflow: OverflowPolicy,
    /// Policy for best-effort batch detector passes.
    pub batch_overflow: OverflowPolicy,
    /// Deadline for periodic batch detector passes.
    pub batch_deadline: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ingest_capacity: 4_096,
            cluster_capacity: 1_024,
            detect_capacity: 1_024,
            score_capacity: 1_024,
            alert_capacity: 512,
            ingest_overflow: OverflowPolicy::Block,
            batch_overflow: OverflowPolicy::DropWithMetric,
            batch_deadline: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// Unified configuration
// ============================================================================

/// Unified engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Clustering engine settings.
    pub clustering: ClusteringConfig,
    /// Flow tracer settings.
    pub tracer: TracerConfig,
    /// Pattern detector settings.
    pub detectors: DetectorConfig,
    /// Risk scorer settings.
    pub risk: RiskConfig,
    /// Computation cache settings.
    pub cache: CacheConfig,
    /// Alert delivery retry settings.
    pub alert_retry: AlertRetryConfig,
    /// Pipeline settings.
    pub pipeline: PipelineConfig,
}

impl EngineConfig {
    /// Development configuration: small queues, short deadlines.
    #[must_use]
    pub fn development() -> Self {
        Self {
            pipeline: PipelineConfig {
                ingest_capacity: 64,
                cluster_capacity: 64,
                detect_capacity: 64,
                score_capacity: 64,
                alert_capacity: 64,
                batch_deadline: Duration::from_secs(5),
                ..PipelineConfig::default()
            },
            alert_retry: AlertRetryConfig {
                max_attempts: 2,
                initial_delay: Duration::from_millis(10),
                overall_deadline: Duration::from_secs(2),
                ..AlertRetryConfig::default()
            },
            ..Self::default()
        }
    }

    /// Production configuration.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    ///
    /// `LEDGERSIGHT_ENV` selects the preset; individual thresholds can be
    /// overridden via `LEDGERSIGHT_MERGE_THRESHOLD`,
    /// `LEDGERSIGHT_REPORTING_THRESHOLD`, and
    /// `LEDGERSIGHT_DIMINISHING_FACTOR`.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("LEDGERSIGHT_ENV").as_deref() {
            Ok("production") | Ok("prod") => Self::production(),
            _ => Self::development(),
        };

        if let Ok(v) = std::env::var("LEDGERSIGHT_MERGE_THRESHOLD") {
            config.clustering.merge_threshold = v
                .parse()
                .map_err(|_| EngineError::config(format!("invalid merge threshold: {v}")))?;
        }
        if let Ok(v) = std::env::var("LEDGERSIGHT_REPORTING_THRESHOLD") {
            config.detectors.structuring.reporting_threshold = v
                .parse()
                .map_err(|_| EngineError::config(format!("invalid reporting threshold: {v}")))?;
        }
        if let Ok(v) = std::env::var("LEDGERSIGHT_DIMINISHING_FACTOR") {
            config.risk.diminishing_factor = v
                .parse()
                .map_err(|_| EngineError::config(format!("invalid diminishing factor: {v}")))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration. Errors here are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        fn unit(name: &str, v: f64) -> Result<()> {
            if !(0.0..=1.0).contains(&v) || !v.is_finite() {
                return Err(EngineError::config(format!("{name} must be in [0, 1], got {v}")));
            }
            Ok(())
        }

        unit("clustering.merge_threshold", self.clustering.merge_threshold)?;
        unit(
            "clustering.common_input_confidence",
            self.clustering.common_input_confidence,
        )?;
        unit(
            "clustering.peel_continuation_confidence",
            self.clustering.peel_continuation_confidence,
        )?;
        unit(
            "clustering.temporal_similarity_confidence",
            self.clustering.temporal_similarity_confidence,
        )?;

        let p = &self.detectors.peeling;
        unit("detectors.peeling.decay_low", p.decay_low)?;
        unit("detectors.peeling.decay_high", p.decay_high)?;
        if p.decay_low >= p.decay_high {
            return Err(EngineError::config(format!(
                "peeling decay band is empty: [{}, {}]",
                p.decay_low, p.decay_high
            )));
        }
        if p.min_hops < 2 {
            return Err(EngineError::config("peeling.min_hops must be >= 2"));
        }

        if self.detectors.structuring.reporting_threshold <= 0.0 {
            return Err(EngineError::config("structuring.reporting_threshold must be positive"));
        }

        if self.risk.pattern_weights.is_empty() {
            return Err(EngineError::config("risk.pattern_weights must not be empty"));
        }
        for (pattern, weight) in &self.risk.pattern_weights {
            if *weight < 0.0 || !weight.is_finite() {
                return Err(EngineError::config(format!(
                    "risk weight for {pattern} must be non-negative, got {weight}"
                )));
            }
        }
        unit("risk.diminishing_factor", self.risk.diminishing_factor)?;
        if !(self.risk.medium_floor < self.risk.high_floor
            && self.risk.high_floor < self.risk.critical_floor
            && self.risk.critical_floor <= 100.0)
        {
            return Err(EngineError::config("risk level floors must be strictly ascending"));
        }

        unit("tracer.default_min_value_fraction", self.tracer.default_min_value_fraction)?;
        if self.tracer.default_max_hops == 0 {
            return Err(EngineError::config("tracer.default_max_hops must be positive"));
        }

        let pl = &self.pipeline;
        for (name, cap) in [
            ("ingest", pl.ingest_capacity),
            ("cluster", pl.cluster_capacity),
            ("detect", pl.detect_capacity),
            ("score", pl.score_capacity),
            ("alert", pl.alert_capacity),
        ] {
            if cap == 0 {
                return Err(EngineError::config(format!("{name} queue capacity must be positive")));
            }
        }
        if pl.ingest_overflow != OverflowPolicy::Block {
            return Err(EngineError::config(
                "ingestion overflow policy must be Block: ingestion guarantees no event loss",
            ));
        }

        if self.alert_retry.max_attempts == 0 {
            return Err(EngineError::config("alert_retry.max_attempts must be positive"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::development().validate().is_ok());
        assert!(EngineConfig::production().validate().is_ok());
    }

    #[test]
    fn test_empty_weights_rejected() {
        let mut config = EngineConfig::default();
        config.risk.pattern_weights.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_decay_band_rejected() {
        let mut config = EngineConfig::default();
        config.detectors.peeling.decay_low = 0.99;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_blocking_ingest_rejected() {
        let mut config = EngineConfig::default();
        config.pipeline.ingest_overflow = OverflowPolicy::DropWithMetric;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unordered_level_floors_rejected() {
        let mut config = EngineConfig::default();
        config.risk.high_floor = config.risk.medium_floor;
        assert!(config.validate().is_err());
    }
}
