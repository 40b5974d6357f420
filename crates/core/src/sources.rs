//! Upstream L1 client seams.
//!
//! One L1 execution-layer client and at most one beacon client are shared by
//! every inner node in the process. They are safe for concurrent use; only
//! their owner may close them.

use async_trait::async_trait;
use thiserror::Error;

/// Errors from upstream clients.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("client is closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// L1 execution-layer access.
#[async_trait]
pub trait L1Source: Send + Sync {
    /// Chain id reported by the L1 node.
    async fn chain_id(&self) -> Result<u64, ClientError>;

    /// Latest L1 block number.
    async fn block_number(&self) -> Result<u64, ClientError>;

    /// Release the client. Calls after this fail with [`ClientError::Closed`].
    fn close(&self);
}

/// L1 beacon-node access.
#[async_trait]
pub trait BeaconSource: Send + Sync {
    /// Beacon chain genesis time, in unix seconds.
    async fn genesis_time(&self) -> Result<u64, ClientError>;

    /// Beacon node version string.
    async fn node_version(&self) -> Result<String, ClientError>;

    fn close(&self);
}
