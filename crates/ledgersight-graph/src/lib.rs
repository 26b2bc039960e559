//! # Ledgersight Graph
//!
//! The transfer graph layer:
//! - [`store::GraphStore`] — append-only adjacency structure over
//!   addresses and transfers with snapshot-isolated reads
//! - [`tracer::FlowTracer`] — bounded multi-hop path search with cycle
//!   avoidance, value-decay pruning, and cross-chain normalization

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod store;
pub mod tracer;

pub use store::{GraphStore, NeighborQuery};
pub use tracer::{FlowTracer, TraceRequest, TraceResult, TracedHop, TracedPath};
