//! Error types for the Ledgersight engine.
//!
//! The taxonomy follows the engine's degradation policy: malformed input
//! and external-service outages are recovered locally and observable;
//! only store corruption and startup configuration errors are fatal.

use crate::types::{AddressId, ClusterId};
use thiserror::Error;

/// Result type alias using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// A transfer rejected at ingestion. Rejection is per-record and never
/// aborts the surrounding batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    /// A required field was empty or absent.
    #[error("Missing required field: {field}")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },

    /// Amount was zero, negative, or not a finite number.
    #[error("Non-positive amount on {tx_id}")]
    NonPositiveAmount {
        /// Transaction id of the rejected transfer.
        tx_id: String,
    },

    /// A transfer with the same `(tx_id, from, to)` was already ingested.
    #[error("Duplicate transfer {tx_id} ({from} -> {to})")]
    DuplicateTransfer {
        /// Transaction id.
        tx_id: String,
        /// Sending address.
        from: AddressId,
        /// Receiving address.
        to: AddressId,
    },
}

/// Contradictory merge evidence surfaced for manual review.
///
/// Raised when a merge attempt crosses a standing separation assertion.
/// The merge is held back and clustering remains in its last consistent
/// state; resolution is manual, never automatic precedence.
#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "Clustering conflict between cluster {cluster_a} and {cluster_b}: \
     merge confidence {merge_confidence:.2} vs separation confidence {separation_confidence:.2}"
)]
pub struct ClusteringConflict {
    /// First cluster involved.
    pub cluster_a: ClusterId,
    /// Second cluster involved.
    pub cluster_b: ClusterId,
    /// Combined confidence of the held-back merge.
    pub merge_confidence: f64,
    /// Confidence of the standing separation assertion.
    pub separation_confidence: f64,
    /// When the conflict was detected (epoch seconds).
    pub detected_at: u64,
}

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A transfer was rejected at ingestion.
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// A cluster merge hit contradictory evidence.
    #[error("Clustering conflict: {0}")]
    Conflict(#[from] ClusteringConflict),

    /// An external lookup service (sanctions, price oracle) was
    /// unreachable. Callers proceed with the gap explicitly marked.
    #[error("External lookup unavailable: {service}")]
    ExternalLookupUnavailable {
        /// The unreachable service.
        service: String,
    },

    /// Alert delivery exhausted its retries. The alert is persisted in a
    /// failed state for later redelivery, never discarded.
    #[error("Alert delivery failed: {alert_id}")]
    DeliveryFailed {
        /// Id of the undelivered alert.
        alert_id: uuid::Uuid,
    },

    /// An inter-stage queue is full.
    #[error("Queue full for stage {stage} (capacity: {capacity})")]
    QueueFull {
        /// Pipeline stage name.
        stage: &'static str,
        /// Queue capacity.
        capacity: usize,
    },

    /// Operation exceeded its deadline.
    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Snapshot invariants were violated. Fatal.
    #[error("Graph store corruption: {0}")]
    StoreCorruption(String),

    /// Invalid configuration detected at startup. Fatal.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Requested subject has no recorded state.
    #[error("Subject not found: {0}")]
    SubjectNotFound(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl EngineError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::ConfigError(msg.into())
    }

    /// Create a store corruption error.
    #[must_use]
    pub fn corruption(msg: impl Into<String>) -> Self {
        EngineError::StoreCorruption(msg.into())
    }

    /// Create an external-lookup-unavailable error.
    #[must_use]
    pub fn lookup_unavailable(service: impl Into<String>) -> Self {
        EngineError::ExternalLookupUnavailable {
            service: service.into(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        EngineError::InternalError(msg.into())
    }

    /// Returns true if the engine degrades gracefully on this error.
    ///
    /// Everything except store corruption and startup configuration
    /// errors is recoverable and observable rather than crash-inducing.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            EngineError::StoreCorruption(_) | EngineError::ConfigError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability_classification() {
        assert!(EngineError::Ingest(IngestError::MissingField { field: "tx_id" })
            .is_recoverable());
        assert!(EngineError::lookup_unavailable("sanctions").is_recoverable());
        assert!(EngineError::Timeout(std::time::Duration::from_secs(1)).is_recoverable());
        assert!(!EngineError::corruption("log shorter than version").is_recoverable());
        assert!(!EngineError::config("missing weights").is_recoverable());
    }

    #[test]
    fn test_ingest_error_display() {
        let err = IngestError::DuplicateTransfer {
            tx_id: "0xabc".into(),
            from: 1,
            to: 2,
        };
        assert_eq!(err.to_string(), "Duplicate transfer 0xabc (1 -> 2)");
    }

    #[test]
    fn test_conflict_carries_both_confidences() {
        let conflict = ClusteringConflict {
            cluster_a: 1,
            cluster_b: 2,
            merge_confidence: 0.72,
            separation_confidence: 0.9,
            detected_at: 1_700_000_000,
        };
        let msg = conflict.to_string();
        assert!(msg.contains("0.72"));
        assert!(msg.contains("0.90"));
    }
}
