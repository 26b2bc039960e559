//! Cross-chain hop detection.
//!
//! Flags subjects that move value off one chain and reappear on
//! another inside a short window, the signature of bridge or OTC-desk
//! laundering legs. Value correspondence is checked through the
//! transfers' reference-currency valuations when present; when either
//! leg lacks one, the match still fires with its confidence scaled by
//! the unconverted penalty.

use crate::context::{DetectionContext, DetectorMetadata, PatternDetector};
use async_trait::async_trait;
use ledgersight_core::error::Result;
use ledgersight_core::types::{
    Direction, EvidenceRef, PatternMatch, PatternType, Subject, TimeWindow, Transfer,
};
use ledgersight_graph::NeighborQuery;
use std::collections::HashSet;
use std::sync::Arc;

const BASE_CONFIDENCE: f64 = 0.75;
// Corroborated legs may differ by bridge fees and slippage.
const VALUE_TOLERANCE: f64 = 0.25;

/// Detects chain-switching value movements.
pub struct CrossChainHopDetector {
    metadata: DetectorMetadata,
}

impl Default for CrossChainHopDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl CrossChainHopDetector {
    /// Create the detector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: DetectorMetadata::new("detect/cross-chain-hop", PatternType::CrossChainHop)
                .with_description("Outflow on one chain reappearing on another"),
        }
    }

    /// Whether the two legs plausibly carry the same value. `None` when
    /// either leg has no reference valuation.
    fn values_correspond(out_leg: &Transfer, in_leg: &Transfer) -> Option<bool> {
        let out_value = out_leg.converted_value?;
        let in_value = in_leg.converted_value?;
        if out_value <= 0.0 {
            return Some(false);
        }
        Some(((out_value - in_value).abs() / out_value) <= VALUE_TOLERANCE)
    }
}

#[async_trait]
impl PatternDetector for CrossChainHopDetector {
    fn metadata(&self) -> &DetectorMetadata {
        &self.metadata
    }

    async fn detect(
        &self,
        ctx: &DetectionContext,
        subject: Subject,
        window: TimeWindow,
    ) -> Result<Vec<PatternMatch>> {
        let config = &ctx.config.bridge;
        let mut matches = Vec::new();

        for address in ctx.subject_addresses(subject) {
            let query = |direction| {
                ctx.store.neighbors(
                    address,
                    NeighborQuery {
                        direction,
                        window,
                        limit: usize::MAX,
                        after_seq: None,
                    },
                    ctx.version,
                )
            };
            let outgoing = query(Direction::Outgoing);
            let incoming = query(Direction::Incoming);

            let chains: HashSet<&str> = outgoing
                .iter()
                .chain(incoming.iter())
                .map(|(_, t)| t.chain.as_str())
                .collect();
            if chains.len() < config.min_chains {
                continue;
            }

            // Earliest out-leg followed by an in-leg on another chain
            // within the hop window.
            let mut best: Option<(u64, Arc<Transfer>, u64, Arc<Transfer>)> = None;
            for (out_seq, out_leg) in &outgoing {
                for (in_seq, in_leg) in &incoming {
                    if in_leg.chain == out_leg.chain
                        || in_leg.timestamp < out_leg.timestamp
                        || in_leg.timestamp - out_leg.timestamp > config.window_secs
                    {
                        continue;
                    }
                    let corroborated = Self::values_correspond(out_leg, in_leg);
                    if corroborated == Some(false) {
                        continue;
                    }
                    let candidate =
                        (*out_seq, Arc::clone(out_leg), *in_seq, Arc::clone(in_leg));
                    if best
                        .as_ref()
                        .map_or(true, |(s, ..)| candidate.0 < *s)
                    {
                        best = Some(candidate);
                    }
                }
            }

            let Some((out_seq, out_leg, in_seq, in_leg)) = best else {
                continue;
            };

            let corroborated = Self::values_correspond(&out_leg, &in_leg).is_some();
            let confidence = if corroborated {
                BASE_CONFIDENCE
            } else {
                BASE_CONFIDENCE * config.unconverted_penalty
            };

            matches.push(PatternMatch {
                pattern: PatternType::CrossChainHop,
                subject,
                confidence,
                evidence: vec![
                    EvidenceRef {
                        seq: out_seq,
                        tx_id: out_leg.tx_id.clone(),
                    },
                    EvidenceRef {
                        seq: in_seq,
                        tx_id: in_leg.tx_id.clone(),
                    },
                ],
                window: TimeWindow::new(out_leg.timestamp, in_leg.timestamp.saturating_add(1)),
                graph_version: ctx.version,
            });
        }

        Ok(matches)
    }
}
