//! Shared fixtures for detector tests.

use crate::context::DetectionContext;
use async_trait::async_trait;
use ledgersight_core::collaborators::ValueConverter;
use ledgersight_core::config::{DetectorConfig, TracerConfig};
use ledgersight_core::types::{AddressId, ClusterId, ClusterView, Transfer};
use ledgersight_graph::{FlowTracer, GraphStore};
use std::sync::Arc;

pub struct NoClusters;

impl ClusterView for NoClusters {
    fn cluster_of(&self, _address: AddressId) -> Option<ClusterId> {
        None
    }

    fn members(&self, _cluster: ClusterId) -> Vec<AddressId> {
        Vec::new()
    }
}

pub struct IdentityConverter;

#[async_trait]
impl ValueConverter for IdentityConverter {
    async fn convert(
        &self,
        _asset: &str,
        amount: f64,
        _chain_from: &str,
        _chain_to: &str,
        _at_time: u64,
    ) -> Option<f64> {
        Some(amount)
    }
}

pub fn transfer(tx_id: &str, from: u64, to: u64, amount: f64, ts: u64) -> Transfer {
    Transfer {
        tx_id: tx_id.to_string(),
        chain: "btc".to_string(),
        from,
        to,
        asset: "btc".to_string(),
        amount,
        converted_value: None,
        timestamp: ts,
        block_height: ts / 600,
    }
}

pub fn chain_transfer(
    tx_id: &str,
    from: u64,
    to: u64,
    amount: f64,
    ts: u64,
    chain: &str,
    converted: Option<f64>,
) -> Transfer {
    Transfer {
        chain: chain.to_string(),
        asset: chain.to_string(),
        converted_value: converted,
        ..transfer(tx_id, from, to, amount, ts)
    }
}

pub fn context(store: Arc<GraphStore>) -> DetectionContext {
    let version = store.snapshot();
    let tracer = Arc::new(FlowTracer::new(
        Arc::clone(&store),
        Arc::new(IdentityConverter),
        TracerConfig::default(),
    ));
    DetectionContext {
        store,
        tracer,
        clusters: Arc::new(NoClusters),
        config: DetectorConfig::default(),
        version,
    }
}
