//! Per-chain restart supervisor.
//!
//! A chain container keeps one virtual node alive for its chain until told
//! to stop. Every restart gets a freshly derived config, a fresh RPC handler
//! registered on the front door, and a fresh metrics hook.

use crate::metrics;
use crate::virtual_node::{SimpleVirtualNode, VirtualNode, VirtualNodeError};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use supernode_core::{
    InitializationOverrides, InnerNodeFactory, RegistryHook, RpcHandler, SetMetricsHandlerFn,
    SetRpcHandlerFn,
};
use supernode_types::{
    chain_sub_path, ChainId, RestartPolicy, RpcConfig, ShutdownTimeouts, SupernodeConfig,
    VirtualNodeConfig, SAFE_DB_SUBPATH,
};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Errors from [`ChainContainer::stop`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainContainerError {
    #[error("chain {chain_id} supervision loop did not finish within {timeout:?}")]
    StopTimeout { chain_id: ChainId, timeout: Duration },
}

/// Builds the virtual node for one restart from its derived config and
/// this run's overrides.
pub type VirtualNodeFactory =
    Arc<dyn Fn(VirtualNodeConfig, InitializationOverrides) -> Arc<dyn VirtualNode> + Send + Sync>;

/// Supervises one chain's virtual node.
#[async_trait]
pub trait ChainContainer: Send + Sync {
    fn chain_id(&self) -> ChainId;

    /// Run the supervision loop until `ctx` is cancelled or [`stop`] is
    /// called.
    ///
    /// [`stop`]: ChainContainer::stop
    async fn start(&self, ctx: CancellationToken);

    /// Stop the loop and wait (bounded) for it to finish. Succeeds
    /// immediately if the loop never started.
    async fn stop(&self) -> Result<(), ChainContainerError>;

    /// Hold back the next restart. A running virtual node is not
    /// interrupted.
    fn pause(&self);

    fn resume(&self);

    fn is_paused(&self) -> bool;

    /// `<data_dir>/<chain_id>/<resource>`.
    fn sub_path(&self, resource: &str) -> PathBuf;
}

/// Default [`ChainContainer`] implementation.
pub struct SimpleChainContainer {
    chain_id: ChainId,
    base_config: VirtualNodeConfig,
    data_dir: PathBuf,
    rpc: RpcConfig,
    restart: RestartPolicy,
    timeouts: ShutdownTimeouts,
    overrides: InitializationOverrides,
    set_rpc_handler: Option<SetRpcHandlerFn>,
    set_metrics_handler: Option<SetMetricsHandlerFn>,
    vn_factory: RwLock<VirtualNodeFactory>,

    vn: Mutex<Option<Arc<dyn VirtualNode>>>,
    stop_requested: AtomicBool,
    run_token: Mutex<Option<CancellationToken>>,
    started: AtomicBool,
    paused: watch::Sender<bool>,
    done: watch::Sender<bool>,
}

impl SimpleChainContainer {
    pub fn new(
        config: VirtualNodeConfig,
        supernode: &SupernodeConfig,
        overrides: InitializationOverrides,
        inner_factory: Arc<dyn InnerNodeFactory>,
        app_version: impl Into<String>,
    ) -> Self {
        let app_version = app_version.into();
        let inner_stop_timeout = supernode.timeouts.node_stop;
        let vn_factory: VirtualNodeFactory = Arc::new(move |config, overrides| {
            Arc::new(
                SimpleVirtualNode::new(
                    Some(config),
                    overrides,
                    Arc::clone(&inner_factory),
                    app_version.clone(),
                )
                .with_inner_stop_timeout(inner_stop_timeout),
            ) as Arc<dyn VirtualNode>
        });

        let (paused, _) = watch::channel(false);
        let (done, _) = watch::channel(false);

        Self {
            chain_id: config.chain_id,
            base_config: config,
            data_dir: supernode.data_dir.clone(),
            rpc: supernode.rpc.clone(),
            restart: supernode.restart,
            timeouts: supernode.timeouts,
            overrides,
            set_rpc_handler: None,
            set_metrics_handler: None,
            vn_factory: RwLock::new(vn_factory),
            vn: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
            run_token: Mutex::new(None),
            started: AtomicBool::new(false),
            paused,
            done,
        }
    }

    pub fn with_rpc_handler_fn(mut self, f: SetRpcHandlerFn) -> Self {
        self.set_rpc_handler = Some(f);
        self
    }

    pub fn with_metrics_handler_fn(mut self, f: SetMetricsHandlerFn) -> Self {
        self.set_metrics_handler = Some(f);
        self
    }

    /// Replace how virtual nodes are built. Takes effect at the next
    /// restart.
    pub fn set_virtual_node_factory(&self, factory: VirtualNodeFactory) {
        *self.vn_factory.write() = factory;
    }

    /// The virtual node of the current (or last) run.
    pub fn current_virtual_node(&self) -> Option<Arc<dyn VirtualNode>> {
        self.vn.lock().clone()
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Per-restart config: isolated networking, chain-scoped persistence,
    /// inherited RPC settings, no private metrics listener.
    fn derive_config(&self) -> VirtualNodeConfig {
        let mut config = self.base_config.clone();
        config.p2p.disabled = true;
        config.safe_db_path = Some(self.sub_path(SAFE_DB_SUBPATH));
        config.rpc = self.rpc.clone();
        config.metrics.enabled = false;
        config
    }

    fn register_handler(&self, key: &str) -> RpcHandler {
        let handler = RpcHandler::new();
        if let Some(set) = &self.set_rpc_handler {
            set(key, handler.clone());
        }
        handler
    }

    fn metrics_hook(&self, key: &str) -> RegistryHook {
        let set = self.set_metrics_handler.clone();
        let key = key.to_string();
        Arc::new(move |registry: prometheus::Registry| {
            if let Some(set) = &set {
                set(&key, registry);
            }
        })
    }

    async fn stop_virtual_node(&self, vn: &Arc<dyn VirtualNode>) {
        match tokio::time::timeout(self.timeouts.node_stop, vn.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(chain_id = %self.chain_id, vn_id = vn.id(), error = %e, "Virtual node stop failed"),
            Err(_) => {
                metrics::record_stop_timeout("virtual_node");
                warn!(chain_id = %self.chain_id, vn_id = vn.id(), "Virtual node stop timed out");
            }
        }
    }

    /// Block while paused. Returns `false` if `token` was cancelled first.
    async fn wait_resumed(&self, token: &CancellationToken) -> bool {
        let mut rx = self.paused.subscribe();
        loop {
            let paused = *rx.borrow_and_update();
            if !paused {
                return true;
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                _ = token.cancelled() => return false,
            }
        }
    }

    async fn supervise(&self, token: CancellationToken) {
        let key = self.chain_id.to_string();
        let mut consecutive_failures = 0u32;

        loop {
            if self.stop_requested() || token.is_cancelled() {
                break;
            }

            let config = self.derive_config();
            let handler = self.register_handler(&key);
            let overrides = self.overrides.for_run(handler.clone(), self.metrics_hook(&key));
            let vn = {
                let factory = self.vn_factory.read().clone();
                factory(config, overrides)
            };
            *self.vn.lock() = Some(Arc::clone(&vn));

            if self.is_paused() {
                handler.stop();
                debug!(chain_id = %self.chain_id, "Chain paused, holding restart");
                if !self.wait_resumed(&token).await {
                    break;
                }
                continue;
            }

            if self.stop_requested() {
                handler.stop();
                break;
            }

            let run_started = Instant::now();
            match vn.start(token.clone()).await {
                Ok(()) => info!(chain_id = %self.chain_id, vn_id = vn.id(), "Virtual node exited"),
                Err(VirtualNodeError::Cancelled) => {
                    debug!(chain_id = %self.chain_id, vn_id = vn.id(), "Virtual node cancelled")
                }
                Err(e) => {
                    error!(chain_id = %self.chain_id, vn_id = vn.id(), error = %e, "Virtual node exited with error")
                }
            }
            self.stop_virtual_node(&vn).await;
            handler.stop();

            if self.stop_requested() || token.is_cancelled() {
                break;
            }

            consecutive_failures = if run_started.elapsed() >= self.restart.stable_after {
                0
            } else {
                consecutive_failures.saturating_add(1)
            };
            let delay = self.restart.backoff(consecutive_failures);
            metrics::record_chain_restart(self.chain_id);
            info!(chain_id = %self.chain_id, ?delay, consecutive_failures, "Restarting virtual node");

            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => break,
                }
            }
        }
    }
}

#[async_trait]
impl ChainContainer for SimpleChainContainer {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn start(&self, ctx: CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!(chain_id = %self.chain_id, "Chain container already started");
            return;
        }

        // Publish the token before checking the flag so a concurrent stop
        // either sees the token or is seen by the check.
        let token = ctx.child_token();
        *self.run_token.lock() = Some(token.clone());
        if self.stop_requested() {
            token.cancel();
        }

        info!(chain_id = %self.chain_id, "Chain container started");
        self.supervise(token).await;
        info!(chain_id = %self.chain_id, "Chain container finished");

        self.done.send_replace(true);
    }

    async fn stop(&self) -> Result<(), ChainContainerError> {
        self.stop_requested.store(true, Ordering::SeqCst);
        if let Some(token) = self.run_token.lock().as_ref() {
            token.cancel();
        }

        let vn = self.vn.lock().clone();
        if let Some(vn) = vn {
            self.stop_virtual_node(&vn).await;
        }

        if !self.started.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut done = self.done.subscribe();
        let wait = async {
            loop {
                if *done.borrow_and_update() {
                    return;
                }
                if done.changed().await.is_err() {
                    return;
                }
            }
        };
        match tokio::time::timeout(self.timeouts.container_stop, wait).await {
            Ok(()) => Ok(()),
            Err(_) => {
                metrics::record_stop_timeout("chain_container");
                Err(ChainContainerError::StopTimeout {
                    chain_id: self.chain_id,
                    timeout: self.timeouts.container_stop,
                })
            }
        }
    }

    fn pause(&self) {
        self.paused.send_replace(true);
        metrics::set_chain_paused(self.chain_id, true);
        info!(chain_id = %self.chain_id, "Chain paused");
    }

    fn resume(&self) {
        self.paused.send_replace(false);
        metrics::set_chain_paused(self.chain_id, false);
        info!(chain_id = %self.chain_id, "Chain resumed");
    }

    fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    fn sub_path(&self, resource: &str) -> PathBuf {
        chain_sub_path(&self.data_dir, self.chain_id, resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_node::tests::{test_overrides, MockFactory, MockInner};
    use crate::virtual_node::VnState;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::AtomicUsize;

    fn supernode_config() -> SupernodeConfig {
        SupernodeConfig::new("http://127.0.0.1:8545", "/data")
            .with_restart_policy(RestartPolicy::immediate())
            .with_timeouts(ShutdownTimeouts {
                node_stop: Duration::from_secs(1),
                container_stop: Duration::from_secs(2),
                listener_shutdown: Duration::ZERO,
            })
    }

    fn container(factory: Arc<MockFactory>) -> Arc<SimpleChainContainer> {
        Arc::new(SimpleChainContainer::new(
            VirtualNodeConfig::new(ChainId(420), "http://127.0.0.1:8551"),
            &supernode_config(),
            test_overrides(),
            factory,
            "v1",
        ))
    }

    /// Virtual node double that exits immediately, counting starts.
    struct QuickExitVn {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl VirtualNode for QuickExitVn {
        async fn start(&self, _parent: CancellationToken) -> Result<(), VirtualNodeError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok(())
        }
        async fn stop(&self) -> Result<(), VirtualNodeError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn state(&self) -> VnState {
            VnState::Stopped
        }
        fn id(&self) -> &str {
            "beef"
        }
    }

    fn quick_exit_factory(starts: Arc<AtomicUsize>, stops: Arc<AtomicUsize>) -> VirtualNodeFactory {
        Arc::new(move |_config: VirtualNodeConfig, _overrides: InitializationOverrides| {
            Arc::new(QuickExitVn {
                starts: starts.clone(),
                stops: stops.clone(),
            }) as Arc<dyn VirtualNode>
        })
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_derived_config() {
        let c = container(MockFactory::new(MockInner::default()));
        let config = c.derive_config();

        assert!(config.p2p.disabled);
        assert!(!config.metrics.enabled);
        assert_eq!(config.safe_db_path, Some(PathBuf::from("/data/420/safe_db")));
        assert_eq!(config.rpc, supernode_config().rpc);
        assert_eq!(c.sub_path("peerstore"), PathBuf::from("/data/420/peerstore"));
    }

    #[tokio::test]
    async fn test_stop_before_start_is_ok() {
        let c = container(MockFactory::new(MockInner::default()));
        c.stop().await.unwrap();
        c.stop().await.unwrap();

        // The stop flag is honored by a later start.
        tokio::time::timeout(Duration::from_secs(1), c.start(CancellationToken::new()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_restarts_after_exit() {
        let c = container(MockFactory::new(MockInner::default()));
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        c.set_virtual_node_factory(quick_exit_factory(starts.clone(), stops.clone()));

        let run = tokio::spawn({
            let c = c.clone();
            async move { c.start(CancellationToken::new()).await }
        });
        wait_until(|| starts.load(Ordering::SeqCst) >= 3).await;

        c.stop().await.unwrap();
        run.await.unwrap();
        // Every run is followed by a virtual node stop.
        assert!(stops.load(Ordering::SeqCst) >= starts.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_context_cancel_ends_loop() {
        let factory = MockFactory::new(MockInner::default());
        let c = container(factory.clone());
        let ctx = CancellationToken::new();

        let run = tokio::spawn({
            let c = c.clone();
            let ctx = ctx.clone();
            async move { c.start(ctx).await }
        });
        wait_until(|| factory.node.started.load(Ordering::SeqCst)).await;

        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert!(*c.done.borrow());
    }

    #[tokio::test]
    async fn test_stop_stops_running_node() {
        let factory = MockFactory::new(MockInner::default());
        let c = container(factory.clone());

        let run = tokio::spawn({
            let c = c.clone();
            async move { c.start(CancellationToken::new()).await }
        });
        wait_until(|| factory.node.started.load(Ordering::SeqCst)).await;

        c.stop().await.unwrap();
        run.await.unwrap();
        assert!(factory.node.stopped.load(Ordering::SeqCst));
        assert_eq!(
            c.current_virtual_node().unwrap().state().await,
            VnState::Stopped
        );
    }

    #[tokio::test]
    async fn test_pause_holds_restart_until_resume() {
        let c = container(MockFactory::new(MockInner::default()));
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        c.set_virtual_node_factory(quick_exit_factory(starts.clone(), stops.clone()));

        c.pause();
        assert!(c.is_paused());
        let run = tokio::spawn({
            let c = c.clone();
            async move { c.start(CancellationToken::new()).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 0);

        c.resume();
        wait_until(|| starts.load(Ordering::SeqCst) >= 1).await;

        c.stop().await.unwrap();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn test_pause_does_not_interrupt_running_node() {
        let factory = MockFactory::new(MockInner::default());
        let c = container(factory.clone());

        let run = tokio::spawn({
            let c = c.clone();
            async move { c.start(CancellationToken::new()).await }
        });
        wait_until(|| factory.node.started.load(Ordering::SeqCst)).await;

        c.pause();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!factory.node.stopped.load(Ordering::SeqCst));
        assert_eq!(
            c.current_virtual_node().unwrap().state().await,
            VnState::Running
        );

        c.stop().await.unwrap();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn test_fresh_handler_per_restart() {
        let registered: Arc<SyncMutex<Vec<(String, RpcHandler)>>> = Arc::default();
        let set_rpc: SetRpcHandlerFn = {
            let registered = registered.clone();
            Arc::new(move |key: &str, handler: RpcHandler| {
                registered.lock().push((key.to_string(), handler));
            })
        };

        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let c = Arc::new(
            SimpleChainContainer::new(
                VirtualNodeConfig::new(ChainId(420), "http://127.0.0.1:8551"),
                &supernode_config(),
                test_overrides(),
                MockFactory::new(MockInner::default()),
                "v1",
            )
            .with_rpc_handler_fn(set_rpc),
        );
        c.set_virtual_node_factory(quick_exit_factory(starts.clone(), stops.clone()));

        let run = tokio::spawn({
            let c = c.clone();
            async move { c.start(CancellationToken::new()).await }
        });
        wait_until(|| starts.load(Ordering::SeqCst) >= 2).await;
        c.stop().await.unwrap();
        run.await.unwrap();

        let registered = registered.lock();
        assert!(registered.len() >= 2);
        assert!(registered.iter().all(|(key, _)| key == "420"));
        assert!(!registered[0].1.same_as(&registered[1].1));
        // Handlers of finished runs are retired.
        assert!(registered[0].1.is_stopped());
    }

    #[tokio::test]
    async fn test_metrics_hook_registers_under_chain_key() {
        let captured: Arc<SyncMutex<Vec<String>>> = Arc::default();
        let set_metrics: SetMetricsHandlerFn = {
            let captured = captured.clone();
            Arc::new(move |key: &str, _registry: prometheus::Registry| captured.lock().push(key.to_string()))
        };
        let c = SimpleChainContainer::new(
            VirtualNodeConfig::new(ChainId(420), "http://127.0.0.1:8551"),
            &supernode_config(),
            test_overrides(),
            MockFactory::new(MockInner::default()),
            "v1",
        )
        .with_metrics_handler_fn(set_metrics);

        let hook = c.metrics_hook("420");
        hook(prometheus::Registry::new());
        assert_eq!(*captured.lock(), vec!["420".to_string()]);
    }

    #[tokio::test]
    async fn test_stop_timeout_when_loop_hangs() {
        struct StuckVn;

        #[async_trait]
        impl VirtualNode for StuckVn {
            async fn start(&self, _parent: CancellationToken) -> Result<(), VirtualNodeError> {
                std::future::pending::<()>().await;
                Ok(())
            }
            async fn stop(&self) -> Result<(), VirtualNodeError> {
                Ok(())
            }
            async fn state(&self) -> VnState {
                VnState::Running
            }
            fn id(&self) -> &str {
                "dead"
            }
        }

        let c = Arc::new(SimpleChainContainer::new(
            VirtualNodeConfig::new(ChainId(420), "http://127.0.0.1:8551"),
            &supernode_config().with_timeouts(ShutdownTimeouts {
                node_stop: Duration::from_millis(50),
                container_stop: Duration::from_millis(100),
                listener_shutdown: Duration::ZERO,
            }),
            test_overrides(),
            MockFactory::new(MockInner::default()),
            "v1",
        ));
        c.set_virtual_node_factory(Arc::new(
            |_: VirtualNodeConfig, _: InitializationOverrides| Arc::new(StuckVn) as Arc<dyn VirtualNode>,
        ));

        let run = tokio::spawn({
            let c = c.clone();
            async move { c.start(CancellationToken::new()).await }
        });
        wait_until(|| c.current_virtual_node().is_some()).await;

        assert!(matches!(
            c.stop().await,
            Err(ChainContainerError::StopTimeout { .. })
        ));
        run.abort();
    }

    /// Virtual node double that runs for a fixed time, recording when.
    struct TimedVn {
        runtime: Duration,
        runs: Arc<SyncMutex<Vec<(Instant, Instant)>>>,
    }

    #[async_trait]
    impl VirtualNode for TimedVn {
        async fn start(&self, _parent: CancellationToken) -> Result<(), VirtualNodeError> {
            let began = Instant::now();
            tokio::time::sleep(self.runtime).await;
            self.runs.lock().push((began, Instant::now()));
            Ok(())
        }
        async fn stop(&self) -> Result<(), VirtualNodeError> {
            Ok(())
        }
        async fn state(&self) -> VnState {
            VnState::Stopped
        }
        fn id(&self) -> &str {
            "cafe"
        }
    }

    fn backoff_container(policy: RestartPolicy) -> Arc<SimpleChainContainer> {
        Arc::new(SimpleChainContainer::new(
            VirtualNodeConfig::new(ChainId(420), "http://127.0.0.1:8551"),
            &supernode_config().with_restart_policy(policy),
            test_overrides(),
            MockFactory::new(MockInner::default()),
            "v1",
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_and_resets_after_stable_run() {
        let c = backoff_container(RestartPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            stable_after: Duration::from_secs(10),
        });

        let short = Duration::from_millis(10);
        let script = [short, short, short, Duration::from_secs(20), short, short];
        let runs: Arc<SyncMutex<Vec<(Instant, Instant)>>> = Arc::default();
        let created = Arc::new(AtomicUsize::new(0));
        c.set_virtual_node_factory({
            let runs = runs.clone();
            Arc::new(move |_config: VirtualNodeConfig, _overrides: InitializationOverrides| {
                let n = created.fetch_add(1, Ordering::SeqCst);
                Arc::new(TimedVn {
                    runtime: script.get(n).copied().unwrap_or(short),
                    runs: runs.clone(),
                }) as Arc<dyn VirtualNode>
            })
        });

        let run = tokio::spawn({
            let c = c.clone();
            async move { c.start(CancellationToken::new()).await }
        });
        tokio::time::timeout(Duration::from_secs(120), async {
            while runs.lock().len() < script.len() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .unwrap();
        c.stop().await.unwrap();
        run.await.unwrap();

        let runs = runs.lock().clone();
        let gaps: Vec<Duration> = runs
            .windows(2)
            .take(script.len() - 1)
            .map(|pair| pair[1].0 - pair[0].1)
            .collect();
        // Doubling after each short run, immediate after the stable one.
        let expected = [100, 200, 400, 0, 100].map(Duration::from_millis);
        for (gap, expected) in gaps.iter().zip(expected) {
            assert!(
                *gap >= expected && *gap < expected + Duration::from_millis(20),
                "gap {gap:?}, expected {expected:?} (all gaps: {gaps:?})"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_ends_loop() {
        let c = backoff_container(RestartPolicy {
            initial_backoff: Duration::from_secs(3600),
            max_backoff: Duration::from_secs(3600),
            stable_after: Duration::from_secs(7200),
        });
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        c.set_virtual_node_factory(quick_exit_factory(starts.clone(), stops.clone()));

        let ctx = CancellationToken::new();
        let began = Instant::now();
        let run = tokio::spawn({
            let c = c.clone();
            let ctx = ctx.clone();
            async move { c.start(ctx).await }
        });
        while stops.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        ctx.cancel();
        run.await.unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(began.elapsed() < Duration::from_secs(3600));
        assert!(*c.done.borrow());
    }
}
