use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Deserialize;

use llmgate_transform::model::ModelMap;

/// One tenant of the gateway: the client-facing auth token, the upstream to
/// forward to, and the model-name table.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub id: String,
    pub auth_token: String,
    pub upstream_base_url: String,
    pub upstream_api_key: String,
    pub models: ModelMap,
}

/// Read-only view of the gateway config lookup interface.
pub trait GatewayStore: Send + Sync {
    fn lookup(&self, gateway_id: &str) -> Option<Arc<GatewayConfig>>;
}

#[derive(Debug, Clone, Default)]
pub struct GatewaySnapshot {
    gateways: HashMap<String, Arc<GatewayConfig>>,
}

impl GatewaySnapshot {
    pub fn new(configs: impl IntoIterator<Item = GatewayConfig>) -> Self {
        Self {
            gateways: configs
                .into_iter()
                .map(|config| (config.id.clone(), Arc::new(config)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}

/// In-memory gateway store. A configuration update replaces the snapshot
/// atomically; in-flight requests keep the snapshot they resolved against.
#[derive(Debug)]
pub struct MemoryGatewayStore {
    snapshot: ArcSwap<GatewaySnapshot>,
}

impl MemoryGatewayStore {
    pub fn new(snapshot: GatewaySnapshot) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn replace_snapshot(&self, snapshot: GatewaySnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }
}

impl GatewayStore for MemoryGatewayStore {
    fn lookup(&self, gateway_id: &str) -> Option<Arc<GatewayConfig>> {
        self.snapshot.load().gateways.get(gateway_id).cloned()
    }
}
