//! Core seams for the supernode.
//!
//! This crate defines the boundaries between the supervision layer and the
//! components it treats as opaque:
//!
//! - [`InnerNode`] / [`InnerNodeFactory`]: the embedded rollup client
//! - [`ExitReporter`]: how an inner node reports a fatal error
//! - [`L1Source`] / [`BeaconSource`]: the shared upstream clients
//! - [`InitializationOverrides`]: resources injected into each inner node
//! - [`RpcHandler`]: the per-run JSON-RPC method table the front door routes to
//!
//! # Architecture
//!
//! ```text
//! Supernode ──owns──► L1 client, beacon client (shared, non-closing views)
//!     │
//!     └─► ChainContainer (per chain) ──restarts──► VirtualNode ──► InnerNode
//!              │                                                  ▲
//!              └── fresh RpcHandler + RegistryHook per restart ───┘
//! ```

mod inner_node;
mod overrides;
mod rpc_handler;
mod sources;

pub use inner_node::{
    factory_fn, ExitReporter, FnFactory, InnerNode, InnerNodeContext, InnerNodeError,
    InnerNodeFactory,
};
pub use overrides::{InitializationOverrides, RegistryHook, SetMetricsHandlerFn, SetRpcHandlerFn};
pub use rpc_handler::RpcHandler;
pub use sources::{BeaconSource, ClientError, L1Source};
