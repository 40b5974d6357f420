//! Lifecycle state machine around one inner node.
//!
//! A virtual node runs exactly once: `NotStarted -> Running -> Stopped`.
//! The chain container builds a fresh one for every restart.

use crate::metrics;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use supernode_core::{
    ExitReporter, InitializationOverrides, InnerNode, InnerNodeContext, InnerNodeError,
    InnerNodeFactory,
};
use supernode_types::VirtualNodeConfig;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Bound on the inner node's `stop` after a run ends.
pub const DEFAULT_INNER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state of a virtual node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnState {
    NotStarted,
    Running,
    Stopped,
}

impl fmt::Display for VnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VnState::NotStarted => "not started",
            VnState::Running => "running",
            VnState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Errors from [`VirtualNode::start`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VirtualNodeError {
    #[error("virtual node config is nil")]
    ConfigNil,

    #[error("virtual node cannot be started in state {0}")]
    CannotStart(VnState),

    #[error("failed to create inner node: {0}")]
    InnerNodeCreation(#[source] InnerNodeError),

    #[error("inner node failed: {0}")]
    InnerNode(#[source] InnerNodeError),

    #[error("virtual node is already starting")]
    AlreadyStarting,

    #[error("virtual node cancelled")]
    Cancelled,
}

/// A single-use supervised inner node.
#[async_trait]
pub trait VirtualNode: Send + Sync {
    /// Build and run the inner node until `parent` is cancelled, [`stop`]
    /// is called, or the inner node reports a failure.
    ///
    /// Returns the inner node's failure if one was reported, otherwise
    /// [`VirtualNodeError::Cancelled`] if `parent` was cancelled.
    ///
    /// [`stop`]: VirtualNode::stop
    async fn start(&self, parent: CancellationToken) -> Result<(), VirtualNodeError>;

    /// Signal the in-flight `start` to finish. A no-op unless running or
    /// constructing the inner node; does not wait for teardown.
    async fn stop(&self) -> Result<(), VirtualNodeError>;

    async fn state(&self) -> VnState;

    /// Short id used in logs.
    fn id(&self) -> &str;
}

struct Lifecycle {
    state: VnState,
    /// Inner node construction in flight.
    starting: bool,
    config: Option<VirtualNodeConfig>,
    cancel: Option<CancellationToken>,
}

/// Default [`VirtualNode`] implementation.
pub struct SimpleVirtualNode {
    vn_id: String,
    app_version: String,
    overrides: InitializationOverrides,
    inner_factory: Arc<dyn InnerNodeFactory>,
    inner_stop_timeout: Duration,
    lifecycle: Mutex<Lifecycle>,
}

impl SimpleVirtualNode {
    pub fn new(
        config: Option<VirtualNodeConfig>,
        overrides: InitializationOverrides,
        inner_factory: Arc<dyn InnerNodeFactory>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            vn_id: format!("{:04x}", rand::random::<u16>()),
            app_version: app_version.into(),
            overrides,
            inner_factory,
            inner_stop_timeout: DEFAULT_INNER_STOP_TIMEOUT,
            lifecycle: Mutex::new(Lifecycle {
                state: VnState::NotStarted,
                starting: false,
                config,
                cancel: None,
            }),
        }
    }

    /// Replace the inner node factory (before `start`).
    pub fn with_inner_factory(mut self, factory: Arc<dyn InnerNodeFactory>) -> Self {
        self.inner_factory = factory;
        self
    }

    pub fn with_inner_stop_timeout(mut self, timeout: Duration) -> Self {
        self.inner_stop_timeout = timeout;
        self
    }

    async fn stop_inner(&self, node: &Arc<dyn InnerNode>) {
        match tokio::time::timeout(self.inner_stop_timeout, node.stop()).await {
            Ok(Ok(())) => debug!(vn_id = %self.vn_id, "Inner node stopped"),
            Ok(Err(e)) => warn!(vn_id = %self.vn_id, error = %e, "Inner node stop failed"),
            Err(_) => {
                metrics::record_stop_timeout("inner_node");
                warn!(
                    vn_id = %self.vn_id,
                    timeout = ?self.inner_stop_timeout,
                    "Inner node stop timed out"
                );
            }
        }
    }

    #[instrument(name = "virtual_node", skip_all, fields(vn_id = %self.vn_id))]
    async fn run(&self, parent: CancellationToken) -> Result<(), VirtualNodeError> {
        let (chain_id, run_token, reporter, ctx) = {
            let mut lifecycle = self.lifecycle.lock().await;
            let Some(config) = lifecycle.config.clone() else {
                return Err(VirtualNodeError::ConfigNil);
            };
            if lifecycle.state != VnState::NotStarted {
                return Err(VirtualNodeError::CannotStart(lifecycle.state));
            }
            if lifecycle.starting {
                return Err(VirtualNodeError::AlreadyStarting);
            }

            let run_token = parent.child_token();
            let reporter = ExitReporter::new(run_token.clone());
            let chain_id = config.chain_id;
            let ctx = InnerNodeContext {
                config,
                overrides: self.overrides.clone(),
                app_version: self.app_version.clone(),
                vn_id: self.vn_id.clone(),
                reporter: reporter.clone(),
            };
            lifecycle.starting = true;
            lifecycle.cancel = Some(run_token.clone());
            (chain_id, run_token, reporter, ctx)
        };

        // Built without the lock; stop and parent cancellation abandon a
        // construction that never finishes.
        let created = tokio::select! {
            biased;
            created = self.inner_factory.create(ctx) => Some(created),
            _ = run_token.cancelled() => None,
        };

        let node = {
            let mut lifecycle = self.lifecycle.lock().await;
            lifecycle.starting = false;
            match created {
                Some(Ok(node)) => {
                    lifecycle.state = VnState::Running;
                    node
                }
                Some(Err(e)) => {
                    lifecycle.cancel = None;
                    return Err(VirtualNodeError::InnerNodeCreation(e));
                }
                None => {
                    lifecycle.state = VnState::Stopped;
                    lifecycle.cancel = None;
                    info!(chain_id = %chain_id, "Virtual node cancelled during inner node construction");
                    if parent.is_cancelled() {
                        return Err(VirtualNodeError::Cancelled);
                    }
                    return Ok(());
                }
            }
        };

        metrics::record_virtual_node_start(chain_id);
        metrics::set_virtual_node_running(chain_id, true);
        info!(chain_id = %chain_id, "Virtual node started");

        let task = tokio::spawn({
            let node = Arc::clone(&node);
            let token = run_token.clone();
            let reporter = reporter.clone();
            async move {
                if let Err(e) = node.start(token).await {
                    reporter.report(e);
                }
            }
        });

        run_token.cancelled().await;

        {
            let mut lifecycle = self.lifecycle.lock().await;
            lifecycle.state = VnState::Stopped;
            lifecycle.cancel = None;
            self.stop_inner(&node).await;
        }
        if !task.is_finished() {
            task.abort();
        }
        metrics::set_virtual_node_running(chain_id, false);

        if let Some(err) = reporter.error() {
            metrics::record_inner_node_failure(chain_id);
            warn!(chain_id = %chain_id, error = %err, "Virtual node stopped after inner node failure");
            return Err(VirtualNodeError::InnerNode(err));
        }
        info!(chain_id = %chain_id, "Virtual node stopped");
        if parent.is_cancelled() {
            return Err(VirtualNodeError::Cancelled);
        }
        Ok(())
    }
}

#[async_trait]
impl VirtualNode for SimpleVirtualNode {
    async fn start(&self, parent: CancellationToken) -> Result<(), VirtualNodeError> {
        self.run(parent).await
    }

    async fn stop(&self) -> Result<(), VirtualNodeError> {
        let lifecycle = self.lifecycle.lock().await;
        if lifecycle.state != VnState::Running && !lifecycle.starting {
            return Ok(());
        }
        if let Some(cancel) = &lifecycle.cancel {
            debug!(vn_id = %self.vn_id, "Stopping virtual node");
            cancel.cancel();
        }
        Ok(())
    }

    async fn state(&self) -> VnState {
        self.lifecycle.lock().await.state
    }

    fn id(&self) -> &str {
        &self.vn_id
    }
}
