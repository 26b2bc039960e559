//! Alert rules and their trigger conditions.

use ledgersight_core::types::{
    PatternMatch, PatternType, RiskAssessment, RiskLevel, Subject,
};
use std::time::Duration;

/// What a rule looks for in an observation.
#[derive(Debug, Clone)]
pub enum AlertCondition {
    /// The subject's assessed level reached this level or above.
    RiskLevelAtLeast(RiskLevel),
    /// A match of this pattern family was detected.
    PatternDetected(PatternType),
    /// The subject's score rose by at least this much since the
    /// previous assessment.
    ScoreJump {
        /// Minimum score increase.
        min_delta: f64,
    },
}

/// One observation handed to the alert engine: the scoring output for a
/// subject at one snapshot.
#[derive(Debug, Clone)]
pub struct Observation<'a> {
    /// Subject the observation concerns.
    pub subject: Subject,
    /// Current assessment, if one was computed.
    pub assessment: Option<&'a RiskAssessment>,
    /// Score of the previous assessment, for jump detection.
    pub previous_score: Option<f64>,
    /// Pattern matches found at this snapshot.
    pub matches: &'a [PatternMatch],
    /// Observation time (epoch seconds).
    pub timestamp: u64,
}

/// A configured alert rule.
#[derive(Debug, Clone)]
pub struct AlertRule {
    /// Stable rule id.
    pub id: String,
    /// Trigger condition.
    pub condition: AlertCondition,
    /// Cooldown after the condition clears before the same
    /// (rule, subject) pair may fire again.
    pub cooldown: Duration,
    /// Severity floor for alerts this rule emits. The derived severity
    /// is raised to at least this level, never lowered.
    pub severity: Option<RiskLevel>,
}

impl AlertRule {
    /// Create a rule with a 15 minute cooldown.
    #[must_use]
    pub fn new(id: impl Into<String>, condition: AlertCondition) -> Self {
        Self {
            id: id.into(),
            condition,
            cooldown: Duration::from_secs(900),
            severity: None,
        }
    }

    /// Set the cooldown.
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Set a severity floor for emitted alerts.
    #[must_use]
    pub fn with_severity(mut self, severity: RiskLevel) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Evaluate the rule. `Some` carries the severity and an evidence
    /// reference for the alert payload.
    #[must_use]
    pub fn evaluate(&self, observation: &Observation<'_>) -> Option<(RiskLevel, String)> {
        let (derived, evidence) = self.evaluate_condition(observation)?;
        let severity = self.severity.map_or(derived, |floor| derived.max(floor));
        Some((severity, evidence))
    }

    fn evaluate_condition(&self, observation: &Observation<'_>) -> Option<(RiskLevel, String)> {
        match &self.condition {
            AlertCondition::RiskLevelAtLeast(floor) => {
                let assessment = observation.assessment?;
                (assessment.level >= *floor).then(|| {
                    (
                        assessment.level,
                        format!("{}:score={:.1}", assessment.graph_version, assessment.score),
                    )
                })
            }
            AlertCondition::PatternDetected(pattern) => {
                let m = observation.matches.iter().find(|m| m.pattern == *pattern)?;
                let seqs: Vec<String> =
                    m.evidence.iter().map(|e| e.seq.to_string()).collect();
                Some((
                    observation
                        .assessment
                        .map_or(RiskLevel::High, |a| a.level.max(RiskLevel::Medium)),
                    format!("{}:{}:[{}]", m.graph_version, m.pattern, seqs.join(",")),
                ))
            }
            AlertCondition::ScoreJump { min_delta } => {
                let assessment = observation.assessment?;
                let previous = observation.previous_score?;
                (assessment.score - previous >= *min_delta).then(|| {
                    (
                        assessment.level,
                        format!(
                            "{}:score={:.1}<-{:.1}",
                            assessment.graph_version, assessment.score, previous
                        ),
                    )
                })
            }
        }
    }

    /// Event type string carried on the payload.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self.condition {
            AlertCondition::RiskLevelAtLeast(_) => "risk_threshold",
            AlertCondition::PatternDetected(_) => "pattern_match",
            AlertCondition::ScoreJump { .. } => "score_jump",
        }
    }
}
