//! Peeling chain detection.
//!
//! A peeling chain moves a large balance hop-to-hop, splitting a small
//! payment off at each step while the bulk continues to a fresh
//! address. The walk follows the dominant output as long as it carries
//! a fraction of the previous hop's dominant amount inside the
//! configured retention band; a fraction above the band is plain
//! forwarding, below it an ordinary split. The peeled remainder need
//! not be visible on the graph (fees, unobserved legs), so decay alone
//! qualifies a hop.

use crate::context::{DetectionContext, DetectorMetadata, PatternDetector, EVIDENCE_CAP};
use async_trait::async_trait;
use ledgersight_core::error::Result;
use ledgersight_core::types::{
    AddressId, Direction, EvidenceRef, PatternMatch, PatternType, Subject, TimeWindow,
};
use ledgersight_graph::NeighborQuery;
use std::collections::HashSet;

// Safety stop for the walk; real peeling chains are far shorter.
const MAX_WALK: usize = 64;

/// Detects hop-by-hop value decay chains.
pub struct PeelingChainDetector {
    metadata: DetectorMetadata,
}

impl Default for PeelingChainDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PeelingChainDetector {
    /// Create the detector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: DetectorMetadata::new("detect/peeling-chain", PatternType::PeelingChain)
                .with_description("Hop-by-hop value decay with per-step peel outputs"),
        }
    }

    /// Follow the dominant-output chain from `start`, collecting one
    /// evidence edge per qualifying hop.
    fn walk(
        &self,
        ctx: &DetectionContext,
        start: AddressId,
        window: TimeWindow,
    ) -> Vec<EvidenceRef> {
        let band = &ctx.config.peeling;
        let mut current = start;
        let mut inbound: Option<f64> = None;
        let mut last_ts = window.start;
        let mut visited: HashSet<AddressId> = HashSet::from([start]);
        let mut evidence = Vec::new();

        for _ in 0..MAX_WALK {
            let outs: Vec<_> = ctx
                .store
                .neighbors(
                    current,
                    NeighborQuery {
                        direction: Direction::Outgoing,
                        window,
                        limit: EVIDENCE_CAP,
                        after_seq: None,
                    },
                    ctx.version,
                )
                .into_iter()
                .filter(|(_, t)| t.timestamp >= last_ts)
                .collect();

            let Some((seq, dominant)) = outs
                .iter()
                .max_by(|a, b| a.1.amount.total_cmp(&b.1.amount))
                .map(|(s, t)| (*s, t.clone()))
            else {
                break;
            };

            // The first hop anchors the chain unmeasured; from the
            // second hop on, decay is measured against the previous
            // dominant amount.
            if let Some(previous) = inbound {
                if previous <= 0.0 {
                    break;
                }
                let fraction = dominant.amount / previous;
                if fraction < band.decay_low || fraction > band.decay_high {
                    break;
                }
            }
            if !visited.insert(dominant.to) {
                break;
            }

            evidence.push(EvidenceRef {
                seq,
                tx_id: dominant.tx_id.clone(),
            });
            inbound = Some(dominant.amount);
            last_ts = dominant.timestamp;
            current = dominant.to;
        }

        evidence
    }
}

#[async_trait]
impl PatternDetector for PeelingChainDetector {
    fn metadata(&self) -> &DetectorMetadata {
        &self.metadata
    }

    async fn detect(
        &self,
        ctx: &DetectionContext,
        subject: Subject,
        window: TimeWindow,
    ) -> Result<Vec<PatternMatch>> {
        let min_hops = ctx.config.peeling.min_hops as usize;
        let mut matches = Vec::new();

        for start in ctx.subject_addresses(subject) {
            let evidence = self.walk(ctx, start, window);
            if evidence.len() < min_hops {
                continue;
            }
            let confidence = (0.5 + 0.1 * evidence.len() as f64).min(0.95);
            matches.push(PatternMatch {
                pattern: PatternType::PeelingChain,
                subject,
                confidence,
                evidence,
                window,
                graph_version: ctx.version,
            });
        }

        Ok(matches)
    }
}
