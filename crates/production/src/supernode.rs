//! The aggregator: one process, many chains.
//!
//! The supernode owns the shared upstream clients, the front-door and
//! metrics listeners, and one chain container per configured chain.
//!
//! # Shutdown order
//!
//! 1. Front-door listener, then metrics listener
//! 2. RPC and metrics routers (releasing every registered handler)
//! 3. Every chain container (independently)
//! 4. Join barrier over every task the supernode launched
//! 5. Shared L1 and beacon clients, strictly last

use crate::chain_container::{ChainContainer, SimpleChainContainer};
use crate::metrics;
use crate::metrics_service::{MetricsRouter, MetricsService};
use crate::rpc::{create_router, HttpServer, HttpServerError, RpcRouter};
use crate::shared::{NonCloseableBeaconSource, NonCloseableL1Source};
use crate::sources::{L1BeaconClient, L1Client, L1ClientConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use supernode_core::{
    BeaconSource, ClientError, InitializationOverrides, InnerNodeFactory, L1Source, RpcHandler,
    SetMetricsHandlerFn, SetRpcHandlerFn,
};
use supernode_types::{ChainId, SupernodeConfig, VirtualNodeConfig};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Per-request timeout of the shared upstream clients.
const UPSTREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SupernodeError {
    #[error("failed to create L1 client: {0}")]
    L1Client(#[source] ClientError),

    #[error("failed to create L1 beacon client: {0}")]
    BeaconClient(#[source] ClientError),

    #[error("no configuration for chain {0}")]
    MissingChainConfig(ChainId),

    #[error("failed to start {name} listener: {source}")]
    Bind {
        name: &'static str,
        #[source]
        source: HttpServerError,
    },

    #[error("{name} listener exited: {source}")]
    Listener {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("supernode cancelled")]
    Cancelled,
}

/// Asks the owner of the process to stop, with the reason.
pub type RequestStopFn = Arc<dyn Fn(SupernodeError) + Send + Sync>;

/// Builder for [`Supernode`].
pub struct SupernodeBuilder {
    config: SupernodeConfig,
    chain_configs: HashMap<ChainId, VirtualNodeConfig>,
    inner_factory: Option<Arc<dyn InnerNodeFactory>>,
    version: String,
    request_stop: Option<RequestStopFn>,
    l1_source: Option<Arc<dyn L1Source>>,
    beacon_source: Option<Arc<dyn BeaconSource>>,
}

impl SupernodeBuilder {
    pub fn new(config: SupernodeConfig) -> Self {
        Self {
            config,
            chain_configs: HashMap::new(),
            inner_factory: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            request_stop: None,
            l1_source: None,
            beacon_source: None,
        }
    }

    pub fn chain_configs(mut self, configs: HashMap<ChainId, VirtualNodeConfig>) -> Self {
        self.chain_configs = configs;
        self
    }

    pub fn chain_config(mut self, config: VirtualNodeConfig) -> Self {
        self.chain_configs.insert(config.chain_id, config);
        self
    }

    pub fn inner_node_factory(mut self, factory: Arc<dyn InnerNodeFactory>) -> Self {
        self.inner_factory = Some(factory);
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn request_stop(mut self, f: RequestStopFn) -> Self {
        self.request_stop = Some(f);
        self
    }

    /// Use `source` instead of connecting to `l1_node_addr`.
    pub fn l1_source(mut self, source: Arc<dyn L1Source>) -> Self {
        self.l1_source = Some(source);
        self
    }

    /// Use `source` instead of connecting to `l1_beacon_addr`.
    pub fn beacon_source(mut self, source: Arc<dyn BeaconSource>) -> Self {
        self.beacon_source = Some(source);
        self
    }

    pub fn build(self) -> Result<Supernode, SupernodeError> {
        let config = self.config;

        let l1: Arc<dyn L1Source> = match self.l1_source {
            Some(source) => source,
            None => Arc::new(
                L1Client::new(L1ClientConfig {
                    addr: config.l1_node_addr.clone(),
                    request_timeout: UPSTREAM_REQUEST_TIMEOUT,
                })
                .map_err(SupernodeError::L1Client)?,
            ),
        };
        let beacon: Option<Arc<dyn BeaconSource>> = match (self.beacon_source, &config.l1_beacon_addr)
        {
            (Some(source), _) => Some(source),
            (None, Some(addr)) => Some(Arc::new(
                L1BeaconClient::new(addr, UPSTREAM_REQUEST_TIMEOUT)
                    .map_err(SupernodeError::BeaconClient)?,
            )),
            (None, None) => None,
        };

        let overrides = InitializationOverrides::new(
            Arc::new(NonCloseableL1Source::new(Arc::clone(&l1))),
            beacon
                .clone()
                .map(|b| Arc::new(NonCloseableBeaconSource::new(b)) as Arc<dyn BeaconSource>),
        );

        let rpc_router = Arc::new(RpcRouter::new());
        let metrics_router = Arc::new(MetricsRouter::new());

        let set_rpc_handler: SetRpcHandlerFn = {
            let router = Arc::clone(&rpc_router);
            Arc::new(move |key: &str, handler: RpcHandler| router.set_handler(key, handler))
        };
        let set_metrics_handler: SetMetricsHandlerFn = {
            let router = Arc::clone(&metrics_router);
            Arc::new(move |key: &str, registry: prometheus::Registry| {
                router.set_handler(key, registry)
            })
        };

        let inner_factory: Arc<dyn InnerNodeFactory> = match self.inner_factory {
            Some(factory) => factory,
            None => Arc::new(crate::head_tracker::HeadTrackerFactory),
        };

        let mut containers: Vec<Arc<dyn ChainContainer>> = Vec::with_capacity(config.chains.len());
        for chain_id in &config.chains {
            let Some(vn_config) = self.chain_configs.get(chain_id) else {
                error!(error = %SupernodeError::MissingChainConfig(*chain_id), "Skipping chain");
                continue;
            };
            let container = SimpleChainContainer::new(
                vn_config.clone(),
                &config,
                overrides.clone(),
                Arc::clone(&inner_factory),
                self.version.clone(),
            )
            .with_rpc_handler_fn(Arc::clone(&set_rpc_handler))
            .with_metrics_handler_fn(Arc::clone(&set_metrics_handler));
            containers.push(Arc::new(container));
        }

        let rpc_server = HttpServer::new(
            "rpc",
            config.rpc.endpoint(),
            create_router(Arc::clone(&rpc_router)),
        );
        let metrics_service = config
            .metrics
            .enabled
            .then(|| MetricsService::new(config.metrics.endpoint(), Arc::clone(&metrics_router)));

        let request_stop = self.request_stop.unwrap_or_else(|| {
            Arc::new(|err: SupernodeError| error!(error = %err, "Supernode stop requested"))
        });

        info!(
            chains = containers.len(),
            version = %self.version,
            beacon = beacon.is_some(),
            "Supernode built"
        );

        Ok(Supernode {
            config,
            l1,
            beacon,
            rpc_router,
            metrics_router,
            rpc_server,
            metrics_service,
            containers,
            request_stop,
            tracker: TaskTracker::new(),
            rpc_addr: watch::channel(None).0,
            stopped: AtomicBool::new(false),
        })
    }
}

/// Runs every configured chain behind one front door.
pub struct Supernode {
    config: SupernodeConfig,
    l1: Arc<dyn L1Source>,
    beacon: Option<Arc<dyn BeaconSource>>,
    rpc_router: Arc<RpcRouter>,
    metrics_router: Arc<MetricsRouter>,
    rpc_server: HttpServer,
    metrics_service: Option<MetricsService>,
    containers: Vec<Arc<dyn ChainContainer>>,
    request_stop: RequestStopFn,
    tracker: TaskTracker,
    rpc_addr: watch::Sender<Option<String>>,
    stopped: AtomicBool,
}

impl Supernode {
    pub fn builder(config: SupernodeConfig) -> SupernodeBuilder {
        SupernodeBuilder::new(config)
    }

    /// Start listeners and every chain, then block until `ctx` is
    /// cancelled.
    ///
    /// Listener failures are reported through the request-stop function
    /// rather than returned.
    pub async fn start(&self, ctx: CancellationToken) -> Result<(), SupernodeError> {
        let (rpc, metrics_addr) = tokio::join!(self.rpc_server.start(), self.start_metrics());

        match rpc {
            Ok((addr, exit)) => {
                self.rpc_addr.send_replace(Some(addr.to_string()));
                info!(addr = %addr, "Front door ready");
                let request_stop = Arc::clone(&self.request_stop);
                self.tracker.spawn(async move {
                    if let Ok(Err(source)) = exit.await {
                        request_stop(SupernodeError::Listener { name: "rpc", source });
                    }
                });
            }
            Err(source) => (self.request_stop)(SupernodeError::Bind { name: "rpc", source }),
        }
        if let Some(Err(source)) = metrics_addr {
            (self.request_stop)(SupernodeError::Bind {
                name: "metrics",
                source,
            });
        }

        for container in &self.containers {
            let container = Arc::clone(container);
            let ctx = ctx.clone();
            self.tracker.spawn(async move { container.start(ctx).await });
        }
        info!(chains = self.containers.len(), "Supernode started");

        ctx.cancelled().await;
        Err(SupernodeError::Cancelled)
    }

    async fn start_metrics(&self) -> Option<Result<std::net::SocketAddr, HttpServerError>> {
        let service = self.metrics_service.as_ref()?;
        let request_stop = Arc::clone(&self.request_stop);
        Some(
            service
                .start(&self.tracker, move |source| {
                    request_stop(SupernodeError::Listener {
                        name: "metrics",
                        source,
                    })
                })
                .await,
        )
    }

    /// Ordered teardown; see the module docs. Errors are logged, never
    /// returned. The join barrier is unbounded; every wait inside the
    /// tasks it covers is bounded.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Supernode already stopped");
            return;
        }
        info!("Stopping supernode");
        let timeouts = self.config.timeouts;

        if let Err(e) = self.rpc_server.shutdown(timeouts.listener_shutdown).await {
            metrics::record_stop_timeout("listener");
            warn!(error = %e, "Front door shutdown failed");
        }
        if let Some(service) = &self.metrics_service {
            if let Err(e) = service.stop(timeouts.listener_shutdown).await {
                metrics::record_stop_timeout("listener");
                warn!(error = %e, "Metrics listener shutdown failed");
            }
        }

        if let Err(e) = self.rpc_router.close() {
            warn!(error = %e, "Failed to close RPC router");
        }
        if !self.metrics_router.close() {
            warn!("Metrics router already closed");
        }

        let stops = self.containers.iter().map(|container| async move {
            (container.chain_id(), container.stop().await)
        });
        for (chain_id, result) in futures::future::join_all(stops).await {
            match result {
                Ok(()) => debug!(chain_id = %chain_id, "Chain container stopped"),
                Err(e) => error!(chain_id = %chain_id, error = %e, "Failed to stop chain container"),
            }
        }

        // Every consumer of the shared clients must be gone before they close.
        self.tracker.close();
        if !self.tracker.is_empty() {
            debug!(remaining = self.tracker.len(), "Waiting for supernode tasks");
        }
        self.tracker.wait().await;

        self.l1.close();
        if let Some(beacon) = &self.beacon {
            beacon.close();
        }
        info!("Supernode stopped");
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Bound front-door address, once the listener is up.
    pub fn rpc_addr(&self) -> Option<String> {
        self.rpc_addr.borrow().clone()
    }

    /// Wait until the front door is bound, or `ctx` is cancelled.
    pub async fn wait_rpc_addr(&self, ctx: &CancellationToken) -> Option<String> {
        let mut rx = self.rpc_addr.subscribe();
        tokio::select! {
            addr = rx.wait_for(Option::is_some) => addr.ok().and_then(|addr| addr.clone()),
            _ = ctx.cancelled() => None,
        }
    }

    /// The shared L1 client (the real one, not a per-chain view).
    pub fn l1_client(&self) -> Arc<dyn L1Source> {
        Arc::clone(&self.l1)
    }

    pub fn beacon_client(&self) -> Option<Arc<dyn BeaconSource>> {
        self.beacon.clone()
    }

    /// Chain containers in configuration order.
    pub fn containers(&self) -> &[Arc<dyn ChainContainer>] {
        &self.containers
    }

    pub fn container(&self, chain_id: ChainId) -> Option<Arc<dyn ChainContainer>> {
        self.containers
            .iter()
            .find(|c| c.chain_id() == chain_id)
            .cloned()
    }

    pub fn rpc_router(&self) -> &Arc<RpcRouter> {
        &self.rpc_router
    }

    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics_service.as_ref().and_then(|s| s.local_addr())
    }
}
