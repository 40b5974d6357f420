//! Supernode runtime.
//!
//! Runs many virtual rollup nodes in one process, behind one front door,
//! sharing one set of L1 clients.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              Supernode                               │
//! │                                                                      │
//! │  Front door (axum)         Metrics listener (axum)                   │
//! │   POST /{chain_id}          GET /metrics, GET /{chain_id}/metrics    │
//! │        │                            │                                │
//! │   RpcRouter                   MetricsRouter                          │
//! │        ▲ set_handler               ▲ set_handler                     │
//! │        │                            │                                │
//! │  ChainContainer (chain 10)   ChainContainer (chain 420)   ...        │
//! │    └─ restart loop            └─ restart loop                        │
//! │        └─ VirtualNode             └─ VirtualNode                     │
//! │            └─ InnerNode               └─ InnerNode                   │
//! │                 │                          │                         │
//! │                 └──── NonCloseable views ──┘                         │
//! │                              │                                       │
//! │                   L1Client / L1BeaconClient (closed last)            │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use supernode_production::Supernode;
//! use supernode_types::{ChainId, SupernodeConfig, VirtualNodeConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = SupernodeConfig::new("http://localhost:8545", "./data")
//!     .with_chains([ChainId(420)]);
//! let supernode = Supernode::builder(config)
//!     .chain_config(VirtualNodeConfig::new(ChainId(420), "http://localhost:8551"))
//!     .build()?;
//!
//! let ctx = CancellationToken::new();
//! let _ = supernode.start(ctx.clone()).await;
//! supernode.stop().await;
//! # Ok(())
//! # }
//! ```

mod chain_container;
mod head_tracker;
pub mod metrics;
mod metrics_service;
pub mod rpc;
mod shared;
pub mod sources;
mod supernode;
pub mod telemetry;
mod virtual_node;

pub use chain_container::{
    ChainContainer, ChainContainerError, SimpleChainContainer, VirtualNodeFactory,
};
pub use head_tracker::{HeadTrackerFactory, HeadTrackerNode};
pub use metrics_service::{create_metrics_router, MetricsRouter, MetricsService};
pub use shared::{NonCloseableBeaconSource, NonCloseableL1Source};
pub use supernode::{RequestStopFn, Supernode, SupernodeBuilder, SupernodeError};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryError, TelemetryGuard};
pub use virtual_node::{
    SimpleVirtualNode, VirtualNode, VirtualNodeError, VnState, DEFAULT_INNER_STOP_TIMEOUT,
};
