//! Detector registry and orchestration.
//!
//! Runs every registered detector against a subject and snapshot. A
//! failing detector is logged and skipped; the pass degrades to the
//! detectors that still work rather than failing outright.

use crate::bridge::CrossChainHopDetector;
use crate::context::{DetectionContext, PatternDetector};
use crate::layering::LayeringDetector;
use crate::mixing::MixingDetector;
use crate::peeling::PeelingChainDetector;
use crate::structuring::StructuringDetector;
use ledgersight_core::types::{PatternMatch, Subject, TimeWindow};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Registry of pattern detectors.
pub struct DetectorRegistry {
    detectors: Vec<Arc<dyn PatternDetector>>,
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl DetectorRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            detectors: Vec::new(),
        }
    }

    /// Registry with the five built-in detectors.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PeelingChainDetector::new()));
        registry.register(Arc::new(StructuringDetector::new()));
        registry.register(Arc::new(MixingDetector::new()));
        registry.register(Arc::new(LayeringDetector::new()));
        registry.register(Arc::new(CrossChainHopDetector::new()));
        registry
    }

    /// Register a detector.
    pub fn register(&mut self, detector: Arc<dyn PatternDetector>) {
        self.detectors.push(detector);
    }

    /// Ids of the registered detectors.
    #[must_use]
    pub fn detector_ids(&self) -> Vec<String> {
        self.detectors
            .iter()
            .map(|d| d.metadata().id.clone())
            .collect()
    }

    /// Run every detector against one subject.
    pub async fn detect(
        &self,
        ctx: &DetectionContext,
        subject: Subject,
        window: TimeWindow,
    ) -> Vec<PatternMatch> {
        let mut matches = Vec::new();
        for detector in &self.detectors {
            match detector.detect(ctx, subject, window).await {
                Ok(found) => {
                    if !found.is_empty() {
                        debug!(
                            detector = %detector.metadata().id,
                            %subject,
                            count = found.len(),
                            "pattern matches"
                        );
                    }
                    matches.extend(found);
                }
                Err(error) => {
                    warn!(
                        detector = %detector.metadata().id,
                        %subject,
                        %error,
                        "detector failed, continuing with the rest"
                    );
                }
            }
        }
        matches
    }

    /// Batch pass over every address under the snapshot.
    ///
    /// Best-effort: stops at the deadline and returns what it found so
    /// far.
    pub async fn sweep(
        &self,
        ctx: &DetectionContext,
        window: TimeWindow,
        deadline: Option<Duration>,
    ) -> Vec<PatternMatch> {
        let started = Instant::now();
        let mut matches = Vec::new();
        let addresses = ctx.store.addresses(ctx.version);
        let total = addresses.len();

        for (scanned, address) in addresses.into_iter().enumerate() {
            if deadline.is_some_and(|d| started.elapsed() >= d) {
                warn!(scanned, total, "batch detection pass hit its deadline");
                break;
            }
            matches.extend(self.detect(ctx, Subject::Address(address), window).await);
        }
        matches
    }
}
