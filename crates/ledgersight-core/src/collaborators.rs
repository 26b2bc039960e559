//! Trait seams for external collaborators.
//!
//! The engine consumes three external services it does not implement:
//! a price/bridge-rate oracle for cross-asset normalization, a sanctions
//! screening service, and a webhook-style notification sink. Each is a
//! trait object so tests can substitute deterministic fakes.

use crate::error::Result;
use crate::types::{AddressId, ExternalSignal, RiskLevel, Subject};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Price/bridge-rate oracle for cross-asset and cross-chain hops.
///
/// `None` means the converter has no rate for the requested pair at that
/// time; the caller marks the affected branch `unconverted` rather than
/// dropping it.
#[async_trait]
pub trait ValueConverter: Send + Sync {
    /// Convert `amount` of `asset` on `chain_from` into the reference
    /// value on `chain_to` at time `at_time`.
    async fn convert(
        &self,
        asset: &str,
        amount: f64,
        chain_from: &str,
        chain_to: &str,
        at_time: u64,
    ) -> Option<f64>;
}

/// External sanctions/watchlist screening service.
#[async_trait]
pub trait SanctionsScreen: Send + Sync {
    /// Look up screening signals for an address.
    ///
    /// Errors with [`crate::error::EngineError::ExternalLookupUnavailable`]
    /// when the service is unreachable; the caller proceeds with the gap
    /// explicitly marked.
    async fn lookup(&self, address: AddressId) -> Result<Vec<ExternalSignal>>;
}

/// Webhook payload handed to the notification sink.
///
/// Delivery is at-least-once from the engine's perspective; consumers
/// must dedup by `alert_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPayload {
    /// Alert id, the consumer-side dedup key.
    pub alert_id: uuid::Uuid,
    /// Event type, e.g. "risk_threshold" or "pattern_match".
    pub event_type: String,
    /// Severity derived from the firing rule.
    pub severity: RiskLevel,
    /// Subject the alert concerns.
    pub subject: Subject,
    /// Reference to the evidence (graph version + match evidence seqs).
    pub evidence_ref: String,
    /// Firing time (epoch seconds).
    pub timestamp: u64,
}

/// External notification/webhook sink.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one alert payload. An `Err` triggers the engine's bounded
    /// retry policy.
    async fn deliver(&self, payload: &AlertPayload) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_payload_serializes_to_webhook_json() {
        let payload = AlertPayload {
            alert_id: uuid::Uuid::nil(),
            event_type: "risk_threshold".into(),
            severity: RiskLevel::High,
            subject: Subject::Cluster(9),
            evidence_ref: "v42:[3,4,5]".into(),
            timestamp: 1_700_000_000,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["event_type"], "risk_threshold");
        assert_eq!(json["severity"], "HIGH");
        assert_eq!(json["subject"], serde_json::json!({ "Cluster": 9 }));
    }
}
