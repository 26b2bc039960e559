//! Laundering pattern detectors.
//!
//! This crate provides the detection layer of the engine:
//! - Peeling chain detection (hop-by-hop value decay)
//! - Structuring detection (sub-threshold transfer bursts)
//! - Mixing detection (balanced high fan-in/fan-out)
//! - Layering detection (pass-through intermediary chains)
//! - Cross-chain hop detection (bridge-style chain switches)
//!
//! Detectors are pluggable behind [`PatternDetector`] and orchestrated
//! by the [`DetectorRegistry`]. Every match carries an evidence chain of
//! log references reproducible against the snapshot it was computed on.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod context;
pub mod layering;
pub mod mixing;
pub mod peeling;
pub mod registry;
pub mod structuring;

#[cfg(test)]
pub(crate) mod testutil;

pub use bridge::CrossChainHopDetector;
pub use context::{DetectionContext, DetectorMetadata, PatternDetector};
pub use layering::LayeringDetector;
pub use mixing::MixingDetector;
pub use peeling::PeelingChainDetector;
pub use registry::DetectorRegistry;
pub use structuring::StructuringDetector;
