//! Entity clustering for the transfer graph.
//!
//! Groups addresses presumed to be controlled by the same real-world
//! entity. Merge evidence accumulates per address pair until it clears
//! the configured threshold; explicit separation assertions always hold
//! merges back and contested pairs land on a review queue instead of
//! being silently resolved.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod harvest;

pub use engine::{ClusterEngine, MergeOutcome, MergeReason};
pub use harvest::ClusterHarvester;
