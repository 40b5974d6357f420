//! Core types for the supernode.
//!
//! This crate provides the foundational types shared by every other
//! workspace crate:
//!
//! - **Identifiers**: [`ChainId`]
//! - **Configuration**: [`SupernodeConfig`], [`VirtualNodeConfig`] and the
//!   listener/restart/shutdown settings they are built from
//! - **Layered settings**: [`ChainConfigLayers`] resolves per-chain
//!   configuration with explicit precedence
//! - **Wire types**: JSON-RPC 2.0 request/response envelopes
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend on
//! any other workspace crates, making it the foundation layer.

mod chain_id;
mod config;
mod layers;
pub mod jsonrpc;

pub use chain_id::{ChainId, ChainIdParseError};
pub use config::{
    chain_sub_path, MetricsConfig, P2pConfig, RestartPolicy, RpcConfig, ShutdownTimeouts,
    SupernodeConfig, VirtualNodeConfig, DEFAULT_L1_FAILURE_THRESHOLD, DEFAULT_L1_POLL_INTERVAL,
    SAFE_DB_SUBPATH,
};
pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use layers::{ChainConfigLayers, ChainSettings, ResolveError};
