//! Versioned assessment storage.
//!
//! Assessments are keyed by `(subject, graph version)`. Recording a
//! newer version never overwrites an older one, so an audit can always
//! recover exactly what the engine believed at any snapshot it scored.

use ledgersight_core::types::{GraphVersion, RiskAssessment, Subject};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct StoreInner {
    by_version: HashMap<(Subject, GraphVersion), RiskAssessment>,
    latest: HashMap<Subject, GraphVersion>,
}

/// Append-only store of versioned risk assessments.
#[derive(Default)]
pub struct AssessmentStore {
    inner: RwLock<StoreInner>,
}

impl AssessmentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an assessment. The latest pointer only moves forward.
    pub fn record(&self, assessment: RiskAssessment) {
        let mut inner = self.inner.write().unwrap();
        let key = (assessment.subject, assessment.graph_version);
        let latest = inner.latest.entry(assessment.subject).or_insert(assessment.graph_version);
        if assessment.graph_version >= *latest {
            *latest = assessment.graph_version;
        }
        inner.by_version.insert(key, assessment);
    }

    /// Assessment of a subject at an exact version.
    #[must_use]
    pub fn at_version(&self, subject: Subject, version: GraphVersion) -> Option<RiskAssessment> {
        let inner = self.inner.read().unwrap();
        inner.by_version.get(&(subject, version)).cloned()
    }

    /// Most recent assessment of a subject.
    #[must_use]
    pub fn latest(&self, subject: Subject) -> Option<RiskAssessment> {
        let inner = self.inner.read().unwrap();
        let version = *inner.latest.get(&subject)?;
        inner.by_version.get(&(subject, version)).cloned()
    }

    /// Number of stored assessments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().by_version.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
