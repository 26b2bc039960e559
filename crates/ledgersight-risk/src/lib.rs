//! Composite risk scoring.
//!
//! Folds pattern matches and external screening signals into a single
//! score in [0, 100] with a discrete level. Scoring is a pure function
//! of `(subject, graph version, inputs)`; assessments are stored keyed
//! by version so superseded results stay queryable for audit.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod scorer;
pub mod store;

pub use scorer::RiskScorer;
pub use store::AssessmentStore;
