//! Risk score computation.
//!
//! Each pattern family contributes `weight * confidence`, with repeats
//! of the same family discounted geometrically so one behavior observed
//! many times cannot dominate the score. Watchlist signals add a flat
//! weight; a sanctions hit pins the level to CRITICAL outright.

use ledgersight_core::config::RiskConfig;
use ledgersight_core::types::{
    ExternalSignal, GraphVersion, PatternMatch, PatternType, RiskAssessment, RiskFactor,
    RiskLevel, SignalKind, Subject,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Computes risk assessments from detection output and external signals.
pub struct RiskScorer {
    config: RiskConfig,
}

impl RiskScorer {
    /// Create a scorer.
    #[must_use]
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Map a score to its discrete level.
    #[must_use]
    pub fn level_for(&self, score: f64) -> RiskLevel {
        if score >= self.config.critical_floor {
            RiskLevel::Critical
        } else if score >= self.config.high_floor {
            RiskLevel::High
        } else if score >= self.config.medium_floor {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Score a subject at a snapshot.
    #[must_use]
    pub fn assess(
        &self,
        subject: Subject,
        matches: &[PatternMatch],
        signals: &[ExternalSignal],
        graph_version: GraphVersion,
    ) -> RiskAssessment {
        let mut factors: Vec<RiskFactor> = Vec::new();
        let mut score = 0.0f64;

        // Group by family in a fixed order, strongest first within a
        // family, and discount repeats. Iteration order is part of the
        // output: recomputation must reproduce factors bit-for-bit.
        let mut by_pattern: BTreeMap<PatternType, Vec<&PatternMatch>> = BTreeMap::new();
        for m in matches {
            by_pattern.entry(m.pattern).or_default().push(m);
        }
        for (pattern, mut group) in by_pattern {
            group.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
            let base = self.config.pattern_weights.get(&pattern).copied().unwrap_or(0.0);
            let mut discount = 1.0;
            for m in group {
                let weight = base * discount;
                score += weight * m.confidence;
                factors.push(RiskFactor::Pattern {
                    pattern,
                    confidence: m.confidence,
                    weight,
                });
                discount *= self.config.diminishing_factor;
            }
        }

        let mut sanctioned = false;
        for signal in signals {
            let weight = match signal.kind {
                SignalKind::SanctionsHit => {
                    sanctioned = true;
                    (self.config.critical_floor - score).max(0.0)
                }
                SignalKind::Watchlist => self.config.watchlist_weight,
                SignalKind::ExchangeLabel => 0.0,
            };
            score += weight;
            factors.push(RiskFactor::Signal {
                signal: signal.kind,
                source: signal.source.clone(),
                weight,
            });
        }

        let score = score.clamp(0.0, 100.0);
        let level = if sanctioned {
            RiskLevel::Critical
        } else {
            self.level_for(score)
        };

        debug!(%subject, score, %level, factors = factors.len(), "risk assessed");

        RiskAssessment {
            subject,
            score,
            level,
            contributing_factors: factors,
            graph_version,
            computed_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersight_core::types::{EvidenceRef, TimeWindow};

    fn pattern_match(pattern: PatternType, confidence: f64) -> PatternMatch {
        PatternMatch {
            pattern,
            subject: Subject::Address(1),
            confidence,
            evidence: vec![EvidenceRef {
                seq: 0,
                tx_id: "tx0".to_string(),
            }],
            window: TimeWindow::all(),
            graph_version: GraphVersion(1),
        }
    }

    fn scorer() -> RiskScorer {
        RiskScorer::new(RiskConfig::default())
    }

    #[test]
    fn test_no_indicators_scores_low() {
        let assessment = scorer().assess(Subject::Address(1), &[], &[], GraphVersion(0));
        assert_eq!(assessment.score, 0.0);
        assert_eq!(assessment.level, RiskLevel::Low);
        assert!(assessment.contributing_factors.is_empty());
    }

    #[test]
    fn test_repeat_matches_diminish() {
        let matches = vec![
            pattern_match(PatternType::Structuring, 1.0),
            pattern_match(PatternType::Structuring, 1.0),
        ];
        let assessment = scorer().assess(Subject::Address(1), &matches, &[], GraphVersion(1));
        // 35 + 35 * 0.6 = 56, versus 70 without diminishing returns.
        assert!((assessment.score - 56.0).abs() < 1e-9);
        assert_eq!(assessment.level, RiskLevel::High);
    }

    #[test]
    fn test_distinct_patterns_do_not_diminish_each_other() {
        let matches = vec![
            pattern_match(PatternType::Structuring, 1.0),
            pattern_match(PatternType::Mixing, 1.0),
        ];
        let assessment = scorer().assess(Subject::Address(1), &matches, &[], GraphVersion(1));
        assert!((assessment.score - 65.0).abs() < 1e-9);
    }

    #[test]
    fn test_sanctions_hit_pins_critical() {
        let signals = vec![ExternalSignal {
            kind: SignalKind::SanctionsHit,
            source: "ofac".to_string(),
            observed_at: 1_700_000_000,
        }];
        let assessment = scorer().assess(Subject::Address(1), &[], &signals, GraphVersion(1));
        assert_eq!(assessment.level, RiskLevel::Critical);
        assert!(assessment.score >= 75.0);
    }

    #[test]
    fn test_watchlist_adds_flat_weight() {
        let signals = vec![ExternalSignal {
            kind: SignalKind::Watchlist,
            source: "internal".to_string(),
            observed_at: 1_700_000_000,
        }];
        let assessment = scorer().assess(Subject::Address(1), &[], &signals, GraphVersion(1));
        assert!((assessment.score - 15.0).abs() < 1e-9);
        assert_eq!(assessment.level, RiskLevel::Low);
    }

    #[test]
    fn test_recomputation_reproduces_factor_order() {
        let matches: Vec<_> = [
            PatternType::Mixing,
            PatternType::PeelingChain,
            PatternType::Structuring,
            PatternType::Layering,
            PatternType::CrossChainHop,
        ]
        .into_iter()
        .map(|p| pattern_match(p, 0.7))
        .collect();
        let scorer = scorer();

        let first = scorer.assess(Subject::Address(1), &matches, &[], GraphVersion(1));
        for _ in 0..20 {
            let again = scorer.assess(Subject::Address(1), &matches, &[], GraphVersion(1));
            assert_eq!(again.score, first.score);
            assert_eq!(again.contributing_factors, first.contributing_factors);
        }
    }

    #[test]
    fn test_score_clamped_to_hundred() {
        let matches: Vec<_> = [
            PatternType::PeelingChain,
            PatternType::Structuring,
            PatternType::Mixing,
            PatternType::Layering,
            PatternType::CrossChainHop,
        ]
        .into_iter()
        .map(|p| pattern_match(p, 1.0))
        .collect();
        let assessment = scorer().assess(Subject::Address(1), &matches, &[], GraphVersion(1));
        assert_eq!(assessment.score, 100.0);
        assert_eq!(assessment.level, RiskLevel::Critical);
    }
}
