//! The inner node seam.
//!
//! A virtual node supervises exactly one inner node: the embedded rollup
//! client. The supernode never looks inside it; it only constructs it
//! through an [`InnerNodeFactory`], starts it, stops it, and listens on the
//! [`ExitReporter`] for self-reported failure.

use crate::overrides::InitializationOverrides;
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, OnceLock};
use supernode_types::VirtualNodeConfig;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Error reported by an inner node.
///
/// Carries only a message: inner nodes are opaque and their errors are
/// logged and used as restart triggers, never matched on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct InnerNodeError(String);

impl InnerNodeError {
    pub fn new(msg: impl fmt::Display) -> Self {
        Self(msg.to_string())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Single-assignment failure slot handed to an inner node.
///
/// The first [`report`](Self::report) records the error and cancels the
/// owning virtual node's run token; later reports only cancel. The virtual
/// node reads the slot once its wait completes.
#[derive(Debug, Clone)]
pub struct ExitReporter {
    slot: Arc<OnceLock<InnerNodeError>>,
    token: CancellationToken,
}

impl ExitReporter {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            slot: Arc::new(OnceLock::new()),
            token,
        }
    }

    /// Record `err` (if nothing was recorded yet) and request shutdown.
    ///
    /// Returns `true` if this call's error was the one recorded.
    pub fn report(&self, err: InnerNodeError) -> bool {
        let recorded = self.slot.set(err).is_ok();
        self.token.cancel();
        recorded
    }

    /// The recorded failure, if any.
    pub fn error(&self) -> Option<InnerNodeError> {
        self.slot.get().cloned()
    }

    /// Token cancelled when the run should end, for whatever reason.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Everything an inner node is built from.
#[derive(Clone)]
pub struct InnerNodeContext {
    /// Per-restart configuration derived by the chain container.
    pub config: VirtualNodeConfig,
    /// Shared upstream clients plus this run's handler and metrics hook.
    pub overrides: InitializationOverrides,
    /// Application version string.
    pub app_version: String,
    /// Short id of the owning virtual node, for logs.
    pub vn_id: String,
    /// Where the inner node reports fatal errors.
    pub reporter: ExitReporter,
}

impl fmt::Debug for InnerNodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InnerNodeContext")
            .field("chain_id", &self.config.chain_id)
            .field("app_version", &self.app_version)
            .field("vn_id", &self.vn_id)
            .finish_non_exhaustive()
    }
}

/// An embedded rollup client.
#[async_trait]
pub trait InnerNode: Send + Sync {
    /// Start the node.
    ///
    /// May return as soon as the node is running, or block until `shutdown`
    /// is cancelled. An `Err` is treated as a self-reported failure.
    async fn start(&self, shutdown: CancellationToken) -> Result<(), InnerNodeError>;

    /// Stop the node and release its per-run resources. Callers bound this
    /// with a timeout.
    async fn stop(&self) -> Result<(), InnerNodeError>;
}

/// Builds a fresh inner node for every virtual node start.
#[async_trait]
pub trait InnerNodeFactory: Send + Sync {
    async fn create(&self, ctx: InnerNodeContext) -> Result<Arc<dyn InnerNode>, InnerNodeError>;
}

/// Adapts a closure into an [`InnerNodeFactory`].
pub struct FnFactory<F>(F);

/// Wrap a synchronous constructor as a factory.
pub fn factory_fn<F>(f: F) -> FnFactory<F>
where
    F: Fn(InnerNodeContext) -> Result<Arc<dyn InnerNode>, InnerNodeError> + Send + Sync,
{
    FnFactory(f)
}

#[async_trait]
impl<F> InnerNodeFactory for FnFactory<F>
where
    F: Fn(InnerNodeContext) -> Result<Arc<dyn InnerNode>, InnerNodeError> + Send + Sync,
{
    async fn create(&self, ctx: InnerNodeContext) -> Result<Arc<dyn InnerNode>, InnerNodeError> {
        (self.0)(ctx)
    }
}
