//! Layering detection.
//!
//! Layering hides an origin behind a chain of pass-through addresses,
//! each forwarding nearly everything it receives. The detector traces
//! outward from the subject and looks for paths whose intermediates
//! each retain no more than the configured fraction, spanning enough
//! distinct clusters that the chain cannot be one entity shuffling its
//! own wallets.

use crate::context::{DetectionContext, DetectorMetadata, PatternDetector};
use async_trait::async_trait;
use ledgersight_core::error::Result;
use ledgersight_core::types::{
    ClusterId, EvidenceRef, PatternMatch, PatternType, Subject, TimeWindow,
};
use ledgersight_graph::{TraceRequest, TracedPath};
use std::collections::HashSet;

/// Detects pass-through intermediary chains.
pub struct LayeringDetector {
    metadata: DetectorMetadata,
}

impl Default for LayeringDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl LayeringDetector {
    /// Create the detector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: DetectorMetadata::new("detect/layering", PatternType::Layering)
                .with_description("Chains of pass-through intermediaries across clusters"),
        }
    }

    /// Distinct intermediate clusters if every intermediate qualifies as
    /// pass-through, else `None`.
    fn qualify(&self, ctx: &DetectionContext, path: &TracedPath) -> Option<usize> {
        let config = &ctx.config.layering;
        if path.hops.len() < config.min_intermediates + 1 {
            return None;
        }

        // Layering moves fast; a chain strung out beyond the window is
        // ordinary long-horizon flow.
        let first = path.hops.first()?;
        let last = path.hops.last()?;
        let start = ctx.store.transfer_at(first.seq, ctx.version)?.timestamp;
        let end = ctx.store.transfer_at(last.seq, ctx.version)?.timestamp;
        if end.saturating_sub(start) > config.window_secs {
            return None;
        }

        for pair in path.hops.windows(2) {
            let received = pair[0].converted.unwrap_or(pair[0].amount);
            let forwarded = pair[1].converted.unwrap_or(pair[1].amount);
            if received <= 0.0 || forwarded > received {
                return None;
            }
            if 1.0 - forwarded / received > config.max_retention_fraction {
                return None;
            }
        }

        let clusters: HashSet<ClusterId> = path.hops[..path.hops.len() - 1]
            .iter()
            .map(|hop| ctx.cluster_or_self(hop.to))
            .collect();
        (clusters.len() >= config.min_intermediates).then_some(clusters.len())
    }
}

#[async_trait]
impl PatternDetector for LayeringDetector {
    fn metadata(&self) -> &DetectorMetadata {
        &self.metadata
    }

    async fn detect(
        &self,
        ctx: &DetectionContext,
        subject: Subject,
        window: TimeWindow,
    ) -> Result<Vec<PatternMatch>> {
        let config = &ctx.config.layering;
        let request = TraceRequest {
            source: subject,
            target: None,
            max_hops: config.min_intermediates as u32 + 2,
            min_value_fraction: 0.5,
            window,
            deadline: None,
        };
        let result = ctx.tracer.trace(&request, ctx.version, Some(ctx.clusters.as_ref())).await;

        // One match per subject: the chain spanning the most clusters.
        let best = result
            .paths
            .iter()
            .filter_map(|path| self.qualify(ctx, path).map(|clusters| (clusters, path)))
            .max_by_key(|(clusters, path)| (*clusters, path.hops.len()));

        let Some((clusters, path)) = best else {
            return Ok(Vec::new());
        };

        let confidence = (0.55 + 0.05 * clusters as f64).min(0.9);
        let first_ts = path.hops.first().map_or(window.start, |h| {
            ctx.store
                .transfer_at(h.seq, ctx.version)
                .map_or(window.start, |t| t.timestamp)
        });
        let last_ts = path.hops.last().map_or(window.end, |h| {
            ctx.store
                .transfer_at(h.seq, ctx.version)
                .map_or(window.end, |t| t.timestamp.saturating_add(1))
        });

        Ok(vec![PatternMatch {
            pattern: PatternType::Layering,
            subject,
            confidence,
            evidence: path
                .hops
                .iter()
                .map(|hop| EvidenceRef {
                    seq: hop.seq,
                    tx_id: hop.tx_id.clone(),
                })
                .collect(),
            window: TimeWindow::new(first_ts, last_ts),
            graph_version: ctx.version,
        }])
    }
}
