//! Resources injected into an inner node at construction.

use crate::rpc_handler::RpcHandler;
use crate::sources::{BeaconSource, L1Source};
use prometheus::Registry;
use std::fmt;
use std::sync::Arc;

/// Registers a handler under a chain key on the front-door router.
pub type SetRpcHandlerFn = Arc<dyn Fn(&str, RpcHandler) + Send + Sync>;

/// Registers a chain's metrics registry on the metrics router.
pub type SetMetricsHandlerFn = Arc<dyn Fn(&str, Registry) + Send + Sync>;

/// Hook an inner node calls with the registry holding its metrics.
pub type RegistryHook = Arc<dyn Fn(Registry) + Send + Sync>;

/// Resources an inner node uses instead of building its own.
///
/// The upstream sources are the supernode's non-closing views; the handler
/// and metrics hook are fresh for every restart.
#[derive(Clone)]
pub struct InitializationOverrides {
    pub l1_source: Arc<dyn L1Source>,
    pub beacon: Option<Arc<dyn BeaconSource>>,
    pub rpc_handler: Option<RpcHandler>,
    pub metrics_hook: Option<RegistryHook>,
}

impl InitializationOverrides {
    pub fn new(l1_source: Arc<dyn L1Source>, beacon: Option<Arc<dyn BeaconSource>>) -> Self {
        Self {
            l1_source,
            beacon,
            rpc_handler: None,
            metrics_hook: None,
        }
    }

    /// Copy sharing the same upstream sources, with this run's handler and
    /// metrics hook.
    pub fn for_run(&self, rpc_handler: RpcHandler, metrics_hook: RegistryHook) -> Self {
        Self {
            l1_source: Arc::clone(&self.l1_source),
            beacon: self.beacon.clone(),
            rpc_handler: Some(rpc_handler),
            metrics_hook: Some(metrics_hook),
        }
    }

    /// Hand a registry to the metrics hook, if one is installed.
    pub fn publish_registry(&self, registry: Registry) {
        if let Some(hook) = &self.metrics_hook {
            hook(registry);
        }
    }
}

impl fmt::Debug for InitializationOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitializationOverrides")
            .field("beacon", &self.beacon.is_some())
            .field("rpc_handler", &self.rpc_handler)
            .field("metrics_hook", &self.metrics_hook.is_some())
            .finish_non_exhaustive()
    }
}
