//! Built-in inner node that follows the L1 head.
//!
//! Used by the `supernode` binary when no other rollup client is embedded.
//! It polls the shared L1 source, serves a few `node_*` JSON-RPC methods on
//! its per-run handler, and publishes an `l1_head` gauge through the
//! registry hook. Repeated polling failures end the run so the chain
//! container restarts it.

use async_trait::async_trait;
use prometheus::{IntGauge, Opts, Registry};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use supernode_core::{
    InnerNode, InnerNodeContext, InnerNodeError, InnerNodeFactory, L1Source,
};
use supernode_types::jsonrpc::JsonRpcError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct HeadTrackerNode {
    ctx: InnerNodeContext,
    l1: Arc<dyn L1Source>,
    head: Arc<AtomicU64>,
    has_head: Arc<AtomicBool>,
    gauge: IntGauge,
    registry: Registry,
}

impl HeadTrackerNode {
    pub fn new(ctx: InnerNodeContext) -> Result<Self, InnerNodeError> {
        let gauge = IntGauge::with_opts(
            Opts::new("l1_head", "Latest L1 block number seen by this chain")
                .const_label("chain_id", ctx.config.chain_id.to_string()),
        )
        .map_err(InnerNodeError::new)?;
        let registry = Registry::new();
        registry
            .register(Box::new(gauge.clone()))
            .map_err(InnerNodeError::new)?;

        Ok(Self {
            l1: Arc::clone(&ctx.overrides.l1_source),
            ctx,
            head: Arc::new(AtomicU64::new(0)),
            has_head: Arc::new(AtomicBool::new(false)),
            gauge,
            registry,
        })
    }

    /// Latest polled L1 block, if any poll succeeded.
    pub fn l1_head(&self) -> Option<u64> {
        self.has_head
            .load(Ordering::SeqCst)
            .then(|| self.head.load(Ordering::SeqCst))
    }

    fn register_methods(&self) {
        let Some(handler) = &self.ctx.overrides.rpc_handler else {
            return;
        };

        let chain_id = self.ctx.config.chain_id.as_u64();
        handler.register("node_chainId", move |_| async move { Ok(json!(chain_id)) });

        let version = self.ctx.app_version.clone();
        handler.register("node_version", move |_| {
            let version = version.clone();
            async move { Ok(json!(version)) }
        });

        let head = Arc::clone(&self.head);
        let has_head = Arc::clone(&self.has_head);
        handler.register("node_l1Head", move |_| {
            let value = if has_head.load(Ordering::SeqCst) {
                json!(head.load(Ordering::SeqCst))
            } else {
                Value::Null
            };
            async move { Ok::<_, JsonRpcError>(value) }
        });
    }

    async fn poll_once(&self) -> Result<(), supernode_core::ClientError> {
        let number = self.l1.block_number().await?;
        self.head.store(number, Ordering::SeqCst);
        self.has_head.store(true, Ordering::SeqCst);
        self.gauge.set(i64::try_from(number).unwrap_or(i64::MAX));
        Ok(())
    }
}

#[async_trait]
impl InnerNode for HeadTrackerNode {
    async fn start(&self, shutdown: CancellationToken) -> Result<(), InnerNodeError> {
        let chain_id = self.ctx.config.chain_id;
        self.register_methods();
        self.ctx.overrides.publish_registry(self.registry.clone());
        info!(chain_id = %chain_id, vn_id = %self.ctx.vn_id, "Head tracker running");

        let threshold = self.ctx.config.l1_failure_threshold.max(1);
        let mut failures = 0u32;
        let mut ticker = tokio::time::interval(self.ctx.config.l1_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            match self.poll_once().await {
                Ok(()) => {
                    failures = 0;
                    debug!(chain_id = %chain_id, head = self.head.load(Ordering::SeqCst), "L1 head updated");
                }
                Err(e) => {
                    failures += 1;
                    warn!(chain_id = %chain_id, error = %e, failures, "L1 head poll failed");
                    if failures >= threshold {
                        return Err(InnerNodeError::new(format!(
                            "L1 head polling failed {failures} times in a row: {e}"
                        )));
                    }
                }
            }
        }
    }

    async fn stop(&self) -> Result<(), InnerNodeError> {
        // No-op on the shared view.
        self.l1.close();
        debug!(chain_id = %self.ctx.config.chain_id, vn_id = %self.ctx.vn_id, "Head tracker stopped");
        Ok(())
    }
}

/// Builds a [`HeadTrackerNode`] per run.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadTrackerFactory;

#[async_trait]
impl InnerNodeFactory for HeadTrackerFactory {
    async fn create(&self, ctx: InnerNodeContext) -> Result<Arc<dyn InnerNode>, InnerNodeError> {
        Ok(Arc::new(HeadTrackerNode::new(ctx)?))
    }
}
