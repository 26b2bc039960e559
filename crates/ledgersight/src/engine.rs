//! Engine facade: component wiring and query operations.

use ledgersight_alert::{Alert, AlertEngine, AlertRule, Observation};
use ledgersight_cache::SingleFlightCache;
use ledgersight_cluster::{ClusterEngine, ClusterHarvester};
use ledgersight_core::collaborators::{NotificationSink, SanctionsScreen, ValueConverter};
use ledgersight_core::config::EngineConfig;
use ledgersight_core::error::{ClusteringConflict, IngestError, Result};
use ledgersight_core::types::{
    AddressId, ClusterId, ClusterView, ExternalSignal, GraphVersion, PatternMatch,
    RiskAssessment, Subject, TimeWindow, Transfer,
};
use ledgersight_detect::{DetectionContext, DetectorRegistry};
use ledgersight_graph::{FlowTracer, GraphStore, TraceRequest, TraceResult};
use ledgersight_risk::{AssessmentStore, RiskScorer};
use std::sync::Arc;
use tracing::{debug, warn};

/// Filters for listing alerts. Empty filter lists everything.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    /// Only alerts from this rule.
    pub rule_id: Option<String>,
    /// Only alerts for this subject.
    pub subject: Option<Subject>,
    /// Only alerts fired at or after this time (epoch seconds).
    pub since: Option<u64>,
}

/// The assembled analysis engine.
///
/// Owns the graph store, clustering, detection, scoring, caching, and
/// alerting components; external services (price oracle, sanctions
/// screening, notification sink) are injected as trait objects.
pub struct Engine {
    config: EngineConfig,
    store: Arc<GraphStore>,
    clusters: Arc<ClusterEngine>,
    harvester: ClusterHarvester,
    tracer: Arc<FlowTracer>,
    registry: DetectorRegistry,
    scorer: RiskScorer,
    assessments: AssessmentStore,
    trace_cache: SingleFlightCache<(String, GraphVersion), TraceResult>,
    risk_cache: SingleFlightCache<(Subject, GraphVersion), RiskAssessment>,
    alerts: AlertEngine,
    sanctions: Arc<dyn SanctionsScreen>,
}

impl Engine {
    /// Assemble an engine. Fails on invalid configuration.
    pub fn new(
        config: EngineConfig,
        converter: Arc<dyn ValueConverter>,
        sanctions: Arc<dyn SanctionsScreen>,
        sink: Arc<dyn NotificationSink>,
        rules: Vec<AlertRule>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(GraphStore::new());
        let clusters = Arc::new(ClusterEngine::new(config.clustering.clone()));
        let harvester = ClusterHarvester::new(
            Arc::clone(&store),
            Arc::clone(&clusters),
            config.clustering.clone(),
        );
        let tracer = Arc::new(FlowTracer::new(
            Arc::clone(&store),
            converter,
            config.tracer.clone(),
        ));

        Ok(Self {
            store,
            clusters,
            harvester,
            tracer,
            registry: DetectorRegistry::with_defaults(),
            scorer: RiskScorer::new(config.risk.clone()),
            assessments: AssessmentStore::new(),
            trace_cache: SingleFlightCache::new(config.cache.clone()),
            risk_cache: SingleFlightCache::new(config.cache.clone()),
            alerts: AlertEngine::new(rules, sink, config.alert_retry.clone()),
            sanctions,
            config,
        })
    }

    /// Current graph snapshot token.
    #[must_use]
    pub fn snapshot(&self) -> GraphVersion {
        self.store.snapshot()
    }

    /// The underlying graph store.
    #[must_use]
    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// Verify store invariants at the current snapshot. An `Err` is
    /// fatal store corruption.
    pub fn verify(&self) -> Result<()> {
        self.store.verify_snapshot(self.store.snapshot())
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Ingest one transfer: append it, harvest new cluster evidence, and
    /// mark dependent cached results stale.
    pub fn ingest(&self, transfer: Transfer) -> Result<()> {
        self.append(transfer)?;
        self.run_clustering();
        Ok(())
    }

    /// Ingest a batch. One bad record never aborts the rest; per-record
    /// results are returned in order.
    pub fn ingest_batch(
        &self,
        transfers: Vec<Transfer>,
    ) -> Vec<std::result::Result<(), IngestError>> {
        let touched: Vec<AddressId> = transfers
            .iter()
            .flat_map(|t| [t.from, t.to])
            .collect();
        let results = self.store.ingest_batch(transfers);
        self.invalidate(&touched);
        self.run_clustering();
        results
    }

    /// Append one transfer and invalidate its endpoints, without running
    /// the clustering pass. The pipeline's clustering stage picks that
    /// up separately.
    pub(crate) fn append(&self, transfer: Transfer) -> Result<()> {
        let (from, to) = (transfer.from, transfer.to);
        self.store.ingest(transfer)?;
        self.invalidate(&[from, to]);
        Ok(())
    }

    /// Harvest cluster evidence up to the current snapshot. A merge
    /// moves addresses far from the triggering transfer, so every member
    /// of a merged cluster gets its caches invalidated.
    pub(crate) fn run_clustering(&self) {
        let report = self.harvester.run(self.store.snapshot());
        if report.merges > 0 {
            self.invalidate(&report.merged_members);
            debug!(merges = report.merges, "cluster merges applied after ingest");
        }
    }

    fn invalidate(&self, touched: &[AddressId]) {
        for &address in touched {
            self.trace_cache.invalidate_address(address);
            self.risk_cache.invalidate_address(address);
        }
    }

    // ========================================================================
    // Clustering queries
    // ========================================================================

    /// Cluster the address currently belongs to.
    #[must_use]
    pub fn cluster_of(&self, address: AddressId) -> Option<ClusterId> {
        self.clusters.cluster_of(address)
    }

    /// Member addresses of a cluster.
    #[must_use]
    pub fn cluster_members(&self, cluster: ClusterId) -> Vec<AddressId> {
        self.clusters.members(cluster)
    }

    /// Drain the clustering conflict review queue.
    #[must_use]
    pub fn take_conflicts(&self) -> Vec<ClusteringConflict> {
        self.clusters.take_conflicts()
    }

    // ========================================================================
    // Tracing
    // ========================================================================

    /// Trace value flow. Results are cached per `(request, snapshot)`
    /// with single-flight semantics; an empty path list is a valid
    /// result, not an error.
    pub async fn trace(&self, request: TraceRequest) -> Result<TraceResult> {
        let at = self.store.snapshot();
        let key = (format!("{request:?}"), at);
        let deps = self.subject_addresses(request.source);

        self.trace_cache
            .get_or_compute(key, &deps, || async {
                Ok(self
                    .tracer
                    .trace(&request, at, Some(self.clusters.as_ref()))
                    .await)
            })
            .await
    }

    // ========================================================================
    // Detection and scoring
    // ========================================================================

    /// Run the detector suite for a subject. Uncached; callers wanting
    /// memoization go through [`Engine::assess`].
    pub async fn pattern_matches(&self, subject: Subject, window: TimeWindow) -> Vec<PatternMatch> {
        let ctx = self.detection_context();
        self.registry.detect(&ctx, subject, window).await
    }

    /// Assess a subject's risk at the current snapshot.
    ///
    /// Cached per `(subject, snapshot)` with single-flight semantics.
    /// The assessment is recorded for audit and fed to the alert engine;
    /// a sanctions screening outage degrades to scoring without signals
    /// rather than failing.
    pub async fn assess(&self, subject: Subject) -> Result<RiskAssessment> {
        let at = self.store.snapshot();
        let deps = self.subject_addresses(subject);

        self.risk_cache
            .get_or_compute((subject, at), &deps, || async move {
                let ctx = self.detection_context();
                let matches = self.registry.detect(&ctx, subject, TimeWindow::all()).await;
                let signals = self.screen(subject).await;
                let previous_score = self.assessments.latest(subject).map(|a| a.score);

                let assessment = self.scorer.assess(subject, &matches, &signals, at);
                self.assessments.record(assessment.clone());

                let observation = Observation {
                    subject,
                    assessment: Some(&assessment),
                    previous_score,
                    matches: &matches,
                    timestamp: assessment.computed_at.timestamp().max(0) as u64,
                };
                self.alerts.observe(&observation).await;

                Ok(assessment)
            })
            .await
    }

    /// Number of trace computations actually executed (cache misses).
    #[must_use]
    pub fn trace_computations(&self) -> u64 {
        self.trace_cache.computations()
    }

    /// Assessment of a subject at an exact past snapshot, for audit.
    #[must_use]
    pub fn assessment_at(&self, subject: Subject, version: GraphVersion) -> Option<RiskAssessment> {
        self.assessments.at_version(subject, version)
    }

    /// Most recent recorded assessment of a subject.
    #[must_use]
    pub fn latest_assessment(&self, subject: Subject) -> Option<RiskAssessment> {
        self.assessments.latest(subject)
    }

    async fn screen(&self, subject: Subject) -> Vec<ExternalSignal> {
        let mut signals = Vec::new();
        for address in self.subject_addresses(subject) {
            match self.sanctions.lookup(address).await {
                Ok(found) => signals.extend(found),
                Err(error) => {
                    warn!(address, %error, "sanctions screening unavailable, scoring without signals");
                }
            }
        }
        signals
    }

    // ========================================================================
    // Alerts
    // ========================================================================

    /// List alerts, optionally filtered.
    #[must_use]
    pub fn alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.alerts
            .alerts()
            .into_iter()
            .filter(|alert| {
                filter.rule_id.as_deref().map_or(true, |r| alert.rule_id == r)
                    && filter.subject.map_or(true, |s| alert.payload.subject == s)
                    && filter.since.map_or(true, |t| alert.payload.timestamp >= t)
            })
            .collect()
    }

    /// Retry delivery of alerts stuck in the failed state.
    pub async fn redeliver_failed_alerts(&self) -> usize {
        self.alerts.redeliver_failed().await
    }

    // ========================================================================
    // Internals
    // ========================================================================

    pub(crate) fn detection_context(&self) -> DetectionContext {
        DetectionContext {
            store: Arc::clone(&self.store),
            tracer: Arc::clone(&self.tracer),
            clusters: Arc::clone(&self.clusters) as Arc<dyn ClusterView>,
            config: self.config.detectors.clone(),
            version: self.store.snapshot(),
        }
    }

    pub(crate) fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    /// Detection-stage entry: run the detector suite for a subject at
    /// one pinned snapshot and return that snapshot with the matches.
    pub(crate) async fn detect_subject(&self, subject: Subject) -> (Vec<PatternMatch>, GraphVersion) {
        let ctx = self.detection_context();
        let version = ctx.version;
        let matches = self.registry.detect(&ctx, subject, TimeWindow::all()).await;
        (matches, version)
    }

    /// Scoring-stage entry: screen, score, and record an assessment from
    /// already-computed matches.
    pub(crate) async fn score_matches(
        &self,
        subject: Subject,
        matches: &[PatternMatch],
        version: GraphVersion,
    ) -> (RiskAssessment, Option<f64>) {
        let signals = self.screen(subject).await;
        let previous_score = self.assessments.latest(subject).map(|a| a.score);
        let assessment = self.scorer.assess(subject, matches, &signals, version);
        self.assessments.record(assessment.clone());
        (assessment, previous_score)
    }

    /// Alerting-stage entry.
    pub(crate) async fn observe_alerts(&self, observation: &Observation<'_>) {
        self.alerts.observe(observation).await;
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn subject_addresses(&self, subject: Subject) -> Vec<AddressId> {
        match subject {
            Subject::Address(a) => vec![a],
            Subject::Cluster(c) => self.clusters.members(c),
        }
    }
}
