//! Alert engine: deduplication state machine and retrying delivery.
//!
//! Each (rule, subject) pair moves through `Idle -> Firing ->
//! Suppressed -> Idle`. A pair fires exactly one alert when its
//! condition first holds; while it keeps holding, or during the
//! cooldown after it clears, no further alert is created.
//!
//! Delivery is at-least-once with bounded exponential backoff under an
//! overall deadline. An alert that exhausts its budget is marked
//! `DeliveryFailed` and retained; `redeliver_failed` retries the whole
//! backlog, for example after a sink outage.

use crate::rules::{AlertRule, Observation};
use ledgersight_core::collaborators::{AlertPayload, NotificationSink};
use ledgersight_core::config::AlertRetryConfig;
use ledgersight_core::error::{EngineError, Result};
use ledgersight_core::types::{RiskLevel, Subject};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Delivery status of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertStatus {
    /// Acknowledged by the sink.
    Delivered,
    /// Retry budget exhausted; awaiting redelivery.
    DeliveryFailed,
    /// Repeat firing while the pair was already firing or cooling
    /// down; archived for audit, never handed to the sink.
    Suppressed,
}

/// A fired alert with its payload and delivery status.
#[derive(Debug, Clone)]
pub struct Alert {
    /// Alert id (also the payload's dedup key).
    pub id: Uuid,
    /// Rule that fired.
    pub rule_id: String,
    /// Payload as handed to the sink.
    pub payload: AlertPayload,
    /// Current delivery status.
    pub status: AlertStatus,
}

#[derive(Debug, Clone, Copy)]
enum PairState {
    Idle,
    Firing,
    Suppressed { until: u64 },
}

/// Evaluates rules against observations and delivers the alerts.
pub struct AlertEngine {
    rules: Vec<AlertRule>,
    sink: Arc<dyn NotificationSink>,
    retry: AlertRetryConfig,
    states: Mutex<HashMap<(String, Subject), PairState>>,
    log: Mutex<Vec<Alert>>,
}

impl AlertEngine {
    /// Create an engine over a sink.
    #[must_use]
    pub fn new(rules: Vec<AlertRule>, sink: Arc<dyn NotificationSink>, retry: AlertRetryConfig) -> Self {
        Self {
            rules,
            sink,
            retry,
            states: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Evaluate every rule against one observation, firing and
    /// delivering alerts as the state machines allow. Repeat firings
    /// while a pair is firing or cooling down are archived with status
    /// [`AlertStatus::Suppressed`] and never delivered. Returns the
    /// alerts delivered (or retained for redelivery) by this
    /// observation.
    pub async fn observe(&self, observation: &Observation<'_>) -> Vec<Alert> {
        let mut fired: Vec<(String, &'static str, RiskLevel, String)> = Vec::new();
        let mut suppressed: Vec<(String, &'static str, RiskLevel, String)> = Vec::new();

        {
            let mut states = self.states.lock().unwrap();
            for rule in &self.rules {
                let key = (rule.id.clone(), observation.subject);
                let state = states.get(&key).copied().unwrap_or(PairState::Idle);
                let holds = rule.evaluate(observation);

                let next = match (state, &holds) {
                    (PairState::Idle, Some((severity, evidence))) => {
                        fired.push((
                            rule.id.clone(),
                            rule.event_type(),
                            *severity,
                            evidence.clone(),
                        ));
                        PairState::Firing
                    }
                    (PairState::Idle, None) => PairState::Idle,
                    (PairState::Firing, Some((severity, evidence))) => {
                        suppressed.push((
                            rule.id.clone(),
                            rule.event_type(),
                            *severity,
                            evidence.clone(),
                        ));
                        PairState::Firing
                    }
                    (PairState::Firing, None) => PairState::Suppressed {
                        until: observation.timestamp + rule.cooldown.as_secs(),
                    },
                    (PairState::Suppressed { until }, _) if observation.timestamp >= until => {
                        // Cooldown over; an immediately-holding condition
                        // fires again on the next observation.
                        PairState::Idle
                    }
                    (state @ PairState::Suppressed { .. }, Some((severity, evidence))) => {
                        suppressed.push((
                            rule.id.clone(),
                            rule.event_type(),
                            *severity,
                            evidence.clone(),
                        ));
                        state
                    }
                    (state @ PairState::Suppressed { .. }, None) => state,
                };
                states.insert(key, next);
            }
        }

        for (rule_id, event_type, severity, evidence_ref) in suppressed {
            let payload = AlertPayload {
                alert_id: Uuid::new_v4(),
                event_type: event_type.to_string(),
                severity,
                subject: observation.subject,
                evidence_ref,
                timestamp: observation.timestamp,
            };
            debug!(
                alert_id = %payload.alert_id,
                rule = %rule_id,
                subject = %observation.subject,
                "repeat firing suppressed"
            );
            self.log.lock().unwrap().push(Alert {
                id: payload.alert_id,
                rule_id,
                payload,
                status: AlertStatus::Suppressed,
            });
        }

        let mut alerts = Vec::new();
        for (rule_id, event_type, severity, evidence_ref) in fired {
            let payload = AlertPayload {
                alert_id: Uuid::new_v4(),
                event_type: event_type.to_string(),
                severity,
                subject: observation.subject,
                evidence_ref,
                timestamp: observation.timestamp,
            };
            info!(
                alert_id = %payload.alert_id,
                rule = %rule_id,
                subject = %observation.subject,
                severity = %severity,
                "alert fired"
            );

            let status = match self.deliver_with_retry(&payload).await {
                Ok(()) => AlertStatus::Delivered,
                Err(error) => {
                    warn!(alert_id = %payload.alert_id, %error, "alert delivery failed, retained for redelivery");
                    AlertStatus::DeliveryFailed
                }
            };

            let alert = Alert {
                id: payload.alert_id,
                rule_id,
                payload,
                status,
            };
            self.log.lock().unwrap().push(alert.clone());
            alerts.push(alert);
        }
        alerts
    }

    /// Retry delivery of every alert stuck in `DeliveryFailed`. Returns
    /// how many were delivered this time.
    pub async fn redeliver_failed(&self) -> usize {
        let backlog: Vec<Alert> = self
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.status == AlertStatus::DeliveryFailed)
            .cloned()
            .collect();

        let mut delivered = 0usize;
        for alert in backlog {
            if self.deliver_with_retry(&alert.payload).await.is_ok() {
                let mut log = self.log.lock().unwrap();
                if let Some(entry) = log.iter_mut().find(|a| a.id == alert.id) {
                    entry.status = AlertStatus::Delivered;
                }
                delivered += 1;
            }
        }
        if delivered > 0 {
            info!(delivered, "failed alerts redelivered");
        }
        delivered
    }

    /// Full alert log, newest last.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.log.lock().unwrap().clone()
    }

    async fn deliver_with_retry(&self, payload: &AlertPayload) -> Result<()> {
        let started = Instant::now();
        let mut delay = self.retry.initial_delay;

        for attempt in 1..=self.retry.max_attempts {
            match self.sink.deliver(payload).await {
                Ok(()) => {
                    debug!(alert_id = %payload.alert_id, attempt, "alert delivered");
                    return Ok(());
                }
                Err(error) => {
                    warn!(alert_id = %payload.alert_id, attempt, %error, "delivery attempt failed");
                }
            }

            if attempt == self.retry.max_attempts
                || started.elapsed() + delay >= self.retry.overall_deadline
            {
                break;
            }
            tokio::time::sleep(delay).await;
            delay = Duration::from_secs_f64(
                (delay.as_secs_f64() * self.retry.backoff_factor)
                    .min(self.retry.max_delay.as_secs_f64()),
            );
        }

        Err(EngineError::DeliveryFailed {
            alert_id: payload.alert_id,
        })
    }
}
