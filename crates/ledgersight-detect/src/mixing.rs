//! Mixing detection.
//!
//! A mixing address takes deposits from many senders and pays out to
//! many recipients in a short burst, with inflow and outflow roughly
//! balanced. The detector slides the configured burst window across
//! the subject's activity and also requires the burst fan to stand out
//! against the subject's own historical baseline, so genuinely busy
//! services need a real spike to match.

use crate::context::{DetectionContext, DetectorMetadata, PatternDetector, EVIDENCE_CAP};
use async_trait::async_trait;
use ledgersight_core::error::Result;
use ledgersight_core::types::{
    AddressId, Direction, EvidenceRef, PatternMatch, PatternType, Subject, TimeWindow, Transfer,
};
use ledgersight_graph::NeighborQuery;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone, Copy)]
enum Side {
    In,
    Out,
}

struct Event {
    seq: u64,
    transfer: Arc<Transfer>,
    side: Side,
}

/// Detects balanced high fan-in/fan-out bursts.
pub struct MixingDetector {
    metadata: DetectorMetadata,
}

impl Default for MixingDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl MixingDetector {
    /// Create the detector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: DetectorMetadata::new("detect/mixing", PatternType::Mixing)
                .with_description("Balanced fan-in/fan-out bursts through one address"),
        }
    }

    fn events_for(
        &self,
        ctx: &DetectionContext,
        address: AddressId,
        window: TimeWindow,
    ) -> Vec<Event> {
        let mut events = Vec::new();
        for (direction, side) in [(Direction::Incoming, Side::In), (Direction::Outgoing, Side::Out)]
        {
            for (seq, transfer) in ctx.store.neighbors(
                address,
                NeighborQuery {
                    direction,
                    window,
                    limit: usize::MAX,
                    after_seq: None,
                },
                ctx.version,
            ) {
                events.push(Event {
                    seq,
                    transfer,
                    side,
                });
            }
        }
        events.sort_by_key(|e| (e.transfer.timestamp, e.seq));
        events
    }

    fn evaluate_burst(&self, ctx: &DetectionContext, burst: &[Event]) -> Option<f64> {
        let config = &ctx.config.mixing;

        let mut senders: HashSet<AddressId> = HashSet::new();
        let mut recipients: HashSet<AddressId> = HashSet::new();
        let mut inflow = 0.0f64;
        let mut outflow = 0.0f64;
        for event in burst {
            match event.side {
                Side::In => {
                    senders.insert(event.transfer.from);
                    inflow += event.transfer.amount;
                }
                Side::Out => {
                    recipients.insert(event.transfer.to);
                    outflow += event.transfer.amount;
                }
            }
        }

        if senders.len() < config.min_fan || recipients.len() < config.min_fan || inflow <= 0.0 {
            return None;
        }
        let imbalance = (inflow - outflow).abs() / inflow;
        if imbalance > config.balance_tolerance {
            return None;
        }

        let fan = senders.len().min(recipients.len()) as f64;
        let confidence =
            (0.6 + 0.03 * (fan - config.min_fan as f64) + 0.1 * (1.0 - imbalance)).min(0.95);
        Some(confidence)
    }

    /// Average distinct-counterparty fan per burst window across the
    /// subject's full activity. `None` when there is too little history
    /// to call a baseline.
    fn baseline_fan(&self, events: &[Event], window_secs: u64) -> Option<f64> {
        let first = events.first()?.transfer.timestamp;
        let last = events.last()?.transfer.timestamp;
        let spans = (last.saturating_sub(first)) / window_secs;
        if spans < 3 {
            return None;
        }
        let distinct: HashSet<AddressId> = events
            .iter()
            .map(|e| match e.side {
                Side::In => e.transfer.from,
                Side::Out => e.transfer.to,
            })
            .collect();
        Some(distinct.len() as f64 / spans as f64)
    }
}

#[async_trait]
impl PatternDetector for MixingDetector {
    fn metadata(&self) -> &DetectorMetadata {
        &self.metadata
    }

    async fn detect(
        &self,
        ctx: &DetectionContext,
        subject: Subject,
        window: TimeWindow,
    ) -> Result<Vec<PatternMatch>> {
        let config = ctx.config.mixing.clone();
        let mut matches = Vec::new();

        for address in ctx.subject_addresses(subject) {
            let events = self.events_for(ctx, address, window);
            if events.is_empty() {
                continue;
            }
            let baseline = self.baseline_fan(&events, config.window_secs);

            let mut best: Option<(f64, usize, usize)> = None;
            let mut lo = 0usize;
            for hi in 0..events.len() {
                while events[hi].transfer.timestamp - events[lo].transfer.timestamp
                    >= config.window_secs
                {
                    lo += 1;
                }
                if let Some(confidence) = self.evaluate_burst(ctx, &events[lo..=hi]) {
                    let burst_fan = (hi - lo + 1) as f64;
                    if let Some(base) = baseline {
                        if burst_fan < config.baseline_factor * base {
                            continue;
                        }
                    }
                    if best.map_or(true, |(c, _, _)| confidence > c) {
                        best = Some((confidence, lo, hi));
                    }
                }
            }

            if let Some((confidence, lo, hi)) = best {
                let burst = &events[lo..=hi];
                matches.push(PatternMatch {
                    pattern: PatternType::Mixing,
                    subject,
                    confidence,
                    evidence: burst
                        .iter()
                        .take(EVIDENCE_CAP)
                        .map(|e| EvidenceRef {
                            seq: e.seq,
                            tx_id: e.transfer.tx_id.clone(),
                        })
                        .collect(),
                    window: TimeWindow::new(
                        burst[0].transfer.timestamp,
                        burst[burst.len() - 1].transfer.timestamp.saturating_add(1),
                    ),
                    graph_version: ctx.version,
                });
            }
        }

        Ok(matches)
    }
}
