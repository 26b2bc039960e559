//! Alerting: rules, deduplication, and delivery.
//!
//! Rules turn assessments and pattern matches into alerts. A
//! per-(rule, subject) state machine deduplicates while a condition
//! keeps holding, then cools down before the pair may fire again.
//! Delivery retries with bounded exponential backoff; an alert whose
//! delivery exhausts the budget is kept in a failed state for explicit
//! redelivery, never dropped.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod rules;

pub use engine::{Alert, AlertEngine, AlertStatus};
pub use rules::{AlertCondition, AlertRule, Observation};
