//! Structuring detection.
//!
//! Flags bursts of transfers sitting just under the reporting
//! threshold whose aggregate crosses it. Outgoing and incoming flows
//! are evaluated separately,
//! since splitting deposits and splitting withdrawals are distinct
//! behaviors; the densest qualifying burst within the rolling window
//! becomes the match.

use crate::context::{DetectionContext, DetectorMetadata, PatternDetector, EVIDENCE_CAP};
use async_trait::async_trait;
use ledgersight_core::error::Result;
use ledgersight_core::types::{
    Direction, EvidenceRef, PatternMatch, PatternType, Subject, TimeWindow, Transfer,
};
use ledgersight_graph::NeighborQuery;
use std::sync::Arc;

// A transfer counts as "just under" when it lands in the top fifth
// below the threshold.
const SUB_THRESHOLD_BAND: f64 = 0.8;

/// Detects sub-threshold transfer bursts.
pub struct StructuringDetector {
    metadata: DetectorMetadata,
}

impl Default for StructuringDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl StructuringDetector {
    /// Create the detector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: DetectorMetadata::new("detect/structuring", PatternType::Structuring)
                .with_description("Bursts of transfers just under the reporting threshold"),
        }
    }

    fn effective_amount(transfer: &Transfer) -> f64 {
        transfer.converted_value.unwrap_or(transfer.amount)
    }

    /// Densest run of sub-threshold transfers inside one rolling window,
    /// as (start index, length) over the sorted candidates.
    fn densest_burst(candidates: &[(u64, Arc<Transfer>)], window_secs: u64) -> (usize, usize) {
        let mut best = (0usize, 0usize);
        let mut lo = 0usize;
        for hi in 0..candidates.len() {
            while candidates[hi].1.timestamp - candidates[lo].1.timestamp >= window_secs {
                lo += 1;
            }
            let len = hi - lo + 1;
            if len > best.1 {
                best = (lo, len);
            }
        }
        best
    }

    fn scan_direction(
        &self,
        ctx: &DetectionContext,
        subject: Subject,
        window: TimeWindow,
        direction: Direction,
    ) -> Option<PatternMatch> {
        let config = &ctx.config.structuring;
        let lower = config.reporting_threshold * SUB_THRESHOLD_BAND;

        let mut candidates: Vec<(u64, Arc<Transfer>)> = Vec::new();
        for address in ctx.subject_addresses(subject) {
            let transfers = ctx.store.neighbors(
                address,
                NeighborQuery {
                    direction,
                    window,
                    limit: usize::MAX,
                    after_seq: None,
                },
                ctx.version,
            );
            candidates.extend(transfers.into_iter().filter(|(_, t)| {
                let amount = Self::effective_amount(t);
                amount >= lower && amount < config.reporting_threshold
            }));
        }
        candidates.sort_by_key(|(seq, t)| (t.timestamp, *seq));
        candidates.dedup_by_key(|(seq, _)| *seq);

        let (start, len) = Self::densest_burst(&candidates, config.window_secs);
        if len < config.min_count {
            return None;
        }

        let burst = &candidates[start..start + len];

        // Splitting only matters once the burst, taken together, would
        // have crossed the threshold it evades.
        let total: f64 = burst.iter().map(|(_, t)| Self::effective_amount(t)).sum();
        if total <= config.reporting_threshold {
            return None;
        }

        // Confidence grows with both the transfer count and how far the
        // aggregate overshoots the threshold.
        let ratio = total / config.reporting_threshold;
        let confidence = (0.55
            + 0.02 * (len - config.min_count) as f64
            + 0.05 * ratio.min(5.0))
        .min(0.98);
        let evidence: Vec<EvidenceRef> = burst
            .iter()
            .take(EVIDENCE_CAP)
            .map(|(seq, t)| EvidenceRef {
                seq: *seq,
                tx_id: t.tx_id.clone(),
            })
            .collect();

        Some(PatternMatch {
            pattern: PatternType::Structuring,
            subject,
            confidence,
            evidence,
            window: TimeWindow::new(
                burst[0].1.timestamp,
                burst[len - 1].1.timestamp.saturating_add(1),
            ),
            graph_version: ctx.version,
        })
    }
}

#[async_trait]
impl PatternDetector for StructuringDetector {
    fn metadata(&self) -> &DetectorMetadata {
        &self.metadata
    }

    async fn detect(
        &self,
        ctx: &DetectionContext,
        subject: Subject,
        window: TimeWindow,
    ) -> Result<Vec<PatternMatch>> {
        let mut matches = Vec::new();
        for direction in [Direction::Outgoing, Direction::Incoming] {
            if let Some(m) = self.scan_direction(ctx, subject, window, direction) {
                matches.push(m);
            }
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{context, transfer};
    use ledgersight_graph::GraphStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sub_threshold_burst_detected() {
        let store = Arc::new(GraphStore::new());
        for i in 0..5u64 {
            store
                .ingest(transfer(&format!("tx{i}"), 1, 50 + i, 9_900.0, 1_000 + i * 60))
                .unwrap();
        }
        let ctx = context(store);

        let detector = StructuringDetector::new();
        let matches = detector
            .detect(&ctx, Subject::Address(1), TimeWindow::all())
            .await
            .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].evidence.len(), 5);
        assert!(matches[0].confidence > 0.6);
    }

    #[tokio::test]
    async fn test_large_burst_caps_evidence_not_confidence() {
        let store = Arc::new(GraphStore::new());
        for i in 0..200u64 {
            store
                .ingest(transfer(&format!("tx{i}"), 1, 50 + i, 9_900.0, 1_000 + i))
                .unwrap();
        }
        let ctx = context(store);

        let detector = StructuringDetector::new();
        let matches = detector
            .detect(&ctx, Subject::Address(1), TimeWindow::all())
            .await
            .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].evidence.len(), EVIDENCE_CAP);
        assert_eq!(matches[0].confidence, 0.98);
    }

    #[tokio::test]
    async fn test_confidence_scales_with_aggregate_overshoot() {
        let light_store = Arc::new(GraphStore::new());
        let heavy_store = Arc::new(GraphStore::new());
        for i in 0..3u64 {
            light_store
                .ingest(transfer(&format!("tx{i}"), 1, 50 + i, 8_100.0, 1_000 + i * 60))
                .unwrap();
            heavy_store
                .ingest(transfer(&format!("tx{i}"), 1, 50 + i, 9_900.0, 1_000 + i * 60))
                .unwrap();
        }
        let detector = StructuringDetector::new();
        let light = detector
            .detect(&context(light_store), Subject::Address(1), TimeWindow::all())
            .await
            .unwrap();
        let heavy = detector
            .detect(&context(heavy_store), Subject::Address(1), TimeWindow::all())
            .await
            .unwrap();

        // Same count; the burst overshooting the threshold further
        // scores higher.
        assert!(heavy[0].confidence > light[0].confidence);
    }

    #[tokio::test]
    async fn test_burst_summing_under_threshold_ignored() {
        let store = Arc::new(GraphStore::new());
        store.ingest(transfer("tx0", 1, 50, 9_900.0, 1_000)).unwrap();
        let mut ctx = context(store);
        ctx.config.structuring.min_count = 1;

        let detector = StructuringDetector::new();
        let matches = detector
            .detect(&ctx, Subject::Address(1), TimeWindow::all())
            .await
            .unwrap();

        // A lone sub-threshold transfer never crossed anything.
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_above_threshold_transfers_ignored() {
        let store = Arc::new(GraphStore::new());
        for i in 0..5u64 {
            store
                .ingest(transfer(&format!("tx{i}"), 1, 50 + i, 15_000.0, 1_000 + i * 60))
                .unwrap();
        }
        let ctx = context(store);

        let detector = StructuringDetector::new();
        let matches = detector
            .detect(&ctx, Subject::Address(1), TimeWindow::all())
            .await
            .unwrap();

        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_spread_out_transfers_not_a_burst() {
        let store = Arc::new(GraphStore::new());
        // One sub-threshold transfer per week never forms a burst.
        for i in 0..5u64 {
            store
                .ingest(transfer(&format!("tx{i}"), 1, 50 + i, 9_900.0, i * 7 * 86_400))
                .unwrap();
        }
        let ctx = context(store);

        let detector = StructuringDetector::new();
        let matches = detector
            .detect(&ctx, Subject::Address(1), TimeWindow::all())
            .await
            .unwrap();

        assert!(matches.is_empty());
    }
}
