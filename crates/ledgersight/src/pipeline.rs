//! Staged analysis pipeline.
//!
//! One bounded queue per stage: ingestion -> clustering -> detection ->
//! scoring -> alerting. The ingestion producer blocks when its queue is
//! full so no event is lost; the periodic batch detection pass feeds
//! the detection queue under its own configurable overflow policy,
//! dropping with a counted metric by default.

use crate::engine::Engine;
use ledgersight_alert::Observation;
use ledgersight_core::config::OverflowPolicy;
use ledgersight_core::error::{EngineError, Result};
use ledgersight_core::types::{
    AddressId, GraphVersion, PatternMatch, RiskAssessment, Subject, TimeWindow, Transfer,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Counters exposed by a running pipeline.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Transfers accepted into the ingest queue.
    pub submitted: AtomicU64,
    /// Transfers rejected at ingestion (malformed or duplicate).
    pub rejected: AtomicU64,
    /// Subjects re-assessed.
    pub assessed: AtomicU64,
    /// Batch-pass subjects dropped on a full queue.
    pub dropped: AtomicU64,
}

// Detection output handed to the scoring stage.
struct Detected {
    subject: Subject,
    matches: Vec<PatternMatch>,
    version: GraphVersion,
}

// Scoring output handed to the alerting stage.
struct Scored {
    subject: Subject,
    assessment: RiskAssessment,
    previous_score: Option<f64>,
    matches: Vec<PatternMatch>,
}

/// Handle to the running pipeline tasks.
pub struct Pipeline {
    ingest_tx: mpsc::Sender<Transfer>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    /// Spawn the pipeline tasks over an engine.
    #[must_use]
    pub fn spawn(engine: Arc<Engine>) -> Self {
        let config = engine.config().pipeline.clone();
        let metrics = Arc::new(PipelineMetrics::default());
        let (ingest_tx, ingest_rx) = mpsc::channel::<Transfer>(config.ingest_capacity);
        let (cluster_tx, cluster_rx) = mpsc::channel::<AddressId>(config.cluster_capacity);
        let (detect_tx, detect_rx) = mpsc::channel::<Subject>(config.detect_capacity);
        let (score_tx, score_rx) = mpsc::channel::<Detected>(config.score_capacity);
        let (alert_tx, alert_rx) = mpsc::channel::<Scored>(config.alert_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = vec![
            tokio::spawn(ingest_stage(
                Arc::clone(&engine),
                ingest_rx,
                cluster_tx,
                Arc::clone(&metrics),
            )),
            tokio::spawn(cluster_stage(
                Arc::clone(&engine),
                cluster_rx,
                detect_tx.clone(),
            )),
            tokio::spawn(detect_stage(Arc::clone(&engine), detect_rx, score_tx)),
            tokio::spawn(score_stage(
                Arc::clone(&engine),
                score_rx,
                alert_tx,
                Arc::clone(&metrics),
            )),
            tokio::spawn(alert_stage(Arc::clone(&engine), alert_rx)),
            tokio::spawn(batch_stage(
                engine,
                detect_tx,
                shutdown_rx,
                config.batch_overflow,
                Arc::clone(&metrics),
            )),
        ];

        info!("analysis pipeline started");
        Self {
            ingest_tx,
            shutdown_tx,
            handles,
            metrics,
        }
    }

    /// Submit a transfer, waiting for queue capacity. Ingestion never
    /// drops events.
    pub async fn submit(&self, transfer: Transfer) -> Result<()> {
        self.ingest_tx
            .send(transfer)
            .await
            .map_err(|_| EngineError::internal("pipeline stopped"))?;
        self.metrics.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Pipeline counters. The handle stays valid across shutdown.
    #[must_use]
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Stop the pipeline, draining queued work first.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        drop(self.ingest_tx);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("analysis pipeline stopped");
    }
}

/// Single writer to the graph: appends transfers and forwards the
/// touched addresses to the clustering stage.
async fn ingest_stage(
    engine: Arc<Engine>,
    mut rx: mpsc::Receiver<Transfer>,
    cluster_tx: mpsc::Sender<AddressId>,
    metrics: Arc<PipelineMetrics>,
) {
    while let Some(transfer) = rx.recv().await {
        let touched = [transfer.from, transfer.to];
        if let Err(error) = engine.append(transfer) {
            metrics.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(%error, "transfer rejected");
            continue;
        }
        for address in touched {
            // Downstream analysis must not lose subjects: block until
            // the clustering stage catches up.
            if cluster_tx.send(address).await.is_err() {
                return;
            }
        }
    }
}

/// Harvests cluster evidence for each touched address, then forwards
/// the subject for detection.
async fn cluster_stage(
    engine: Arc<Engine>,
    mut rx: mpsc::Receiver<AddressId>,
    detect_tx: mpsc::Sender<Subject>,
) {
    while let Some(address) = rx.recv().await {
        engine.run_clustering();
        if detect_tx.send(Subject::Address(address)).await.is_err() {
            return;
        }
    }
}

/// Runs the detector suite per subject at a pinned snapshot.
async fn detect_stage(
    engine: Arc<Engine>,
    mut rx: mpsc::Receiver<Subject>,
    score_tx: mpsc::Sender<Detected>,
) {
    while let Some(subject) = rx.recv().await {
        let (matches, version) = engine.detect_subject(subject).await;
        let detected = Detected {
            subject,
            matches,
            version,
        };
        if score_tx.send(detected).await.is_err() {
            return;
        }
    }
}

/// Screens, scores, and records each detected subject.
async fn score_stage(
    engine: Arc<Engine>,
    mut rx: mpsc::Receiver<Detected>,
    alert_tx: mpsc::Sender<Scored>,
    metrics: Arc<PipelineMetrics>,
) {
    while let Some(detected) = rx.recv().await {
        let (assessment, previous_score) = engine
            .score_matches(detected.subject, &detected.matches, detected.version)
            .await;
        metrics.assessed.fetch_add(1, Ordering::Relaxed);
        let scored = Scored {
            subject: detected.subject,
            assessment,
            previous_score,
            matches: detected.matches,
        };
        if alert_tx.send(scored).await.is_err() {
            return;
        }
    }
}

/// Feeds each assessment through the alert rules.
async fn alert_stage(engine: Arc<Engine>, mut rx: mpsc::Receiver<Scored>) {
    while let Some(scored) = rx.recv().await {
        let observation = Observation {
            subject: scored.subject,
            assessment: Some(&scored.assessment),
            previous_score: scored.previous_score,
            matches: &scored.matches,
            timestamp: scored.assessment.computed_at.timestamp().max(0) as u64,
        };
        engine.observe_alerts(&observation).await;
    }
}

/// Periodic best-effort full detection pass for patterns that only
/// emerge over longer windows.
async fn batch_stage(
    engine: Arc<Engine>,
    detect_tx: mpsc::Sender<Subject>,
    mut shutdown_rx: watch::Receiver<bool>,
    overflow: OverflowPolicy,
    metrics: Arc<PipelineMetrics>,
) {
    let deadline = engine.config().pipeline.batch_deadline;
    let mut interval = tokio::time::interval(deadline);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so a fresh pipeline does
    // not sweep an empty graph.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return;
                }
                continue;
            }
        }

        let ctx = engine.detection_context();
        let matches = engine
            .registry()
            .sweep(&ctx, TimeWindow::all(), Some(deadline))
            .await;

        let subjects: HashSet<Subject> = matches.iter().map(|m| m.subject).collect();
        for subject in subjects {
            match overflow {
                OverflowPolicy::Block => {
                    if detect_tx.send(subject).await.is_err() {
                        return;
                    }
                }
                OverflowPolicy::DropWithMetric => {
                    if detect_tx.try_send(subject).is_err() {
                        metrics.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(%subject, "batch pass dropped subject on full queue");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ledgersight_core::collaborators::{
        AlertPayload, NotificationSink, SanctionsScreen, ValueConverter,
    };
    use ledgersight_core::config::EngineConfig;
    use ledgersight_core::types::ExternalSignal;

    struct Identity;

    #[async_trait]
    impl ValueConverter for Identity {
        async fn convert(&self, _: &str, amount: f64, _: &str, _: &str, _: u64) -> Option<f64> {
            Some(amount)
        }
    }

    struct NoSignals;

    #[async_trait]
    impl SanctionsScreen for NoSignals {
        async fn lookup(&self, _address: AddressId) -> Result<Vec<ExternalSignal>> {
            Ok(Vec::new())
        }
    }

    struct NullSink;

    #[async_trait]
    impl NotificationSink for NullSink {
        async fn deliver(&self, _payload: &AlertPayload) -> Result<()> {
            Ok(())
        }
    }

    fn engine() -> Arc<Engine> {
        Arc::new(
            Engine::new(
                EngineConfig::development(),
                Arc::new(Identity),
                Arc::new(NoSignals),
                Arc::new(NullSink),
                Vec::new(),
            )
            .unwrap(),
        )
    }

    fn transfer(tx_id: &str, from: u64, to: u64, amount: f64, ts: u64) -> Transfer {
        Transfer {
            tx_id: tx_id.to_string(),
            chain: "btc".to_string(),
            from,
            to,
            asset: "btc".to_string(),
            amount,
            converted_value: None,
            timestamp: ts,
            block_height: 1,
        }
    }

    #[tokio::test]
    async fn test_submitted_transfers_flow_through_every_stage() {
        let engine = engine();
        let pipeline = Pipeline::spawn(Arc::clone(&engine));
        let metrics = pipeline.metrics();

        for i in 0..10u64 {
            pipeline
                .submit(transfer(&format!("tx{i}"), 1, 2 + i, 10.0, 100 + i))
                .await
                .unwrap();
        }
        pipeline.shutdown().await;

        assert_eq!(engine.store().len(), 10);
        // Both endpoints of every transfer were re-assessed.
        assert_eq!(metrics.assessed.load(Ordering::Relaxed), 20);
        assert!(engine.latest_assessment(Subject::Address(1)).is_some());
    }

    #[tokio::test]
    async fn test_rejected_transfers_counted_not_fatal() {
        let engine = engine();
        let pipeline = Pipeline::spawn(Arc::clone(&engine));

        pipeline.submit(transfer("tx1", 1, 2, 10.0, 100)).await.unwrap();
        // Duplicate of the first.
        pipeline.submit(transfer("tx1", 1, 2, 10.0, 100)).await.unwrap();
        pipeline.submit(transfer("tx2", 1, 3, -5.0, 100)).await.unwrap();
        let metrics = pipeline.metrics();
        pipeline.shutdown().await;

        assert_eq!(engine.store().len(), 1);
        assert_eq!(metrics.rejected.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.submitted.load(Ordering::Relaxed), 3);
    }
}
