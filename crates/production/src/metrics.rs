//! Supernode process metrics using native Prometheus client.
//!
//! These live in the default registry and are served at `GET /metrics` on the
//! metrics listener. Inner-node metrics are kept out of here: each chain's
//! registry is captured separately and served under its chain id.

use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec,
};
use std::sync::OnceLock;
use supernode_types::ChainId;

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Supervision-layer metrics.
pub struct Metrics {
    // === Lifecycle ===
    pub virtual_node_starts: CounterVec,
    pub virtual_node_running: GaugeVec,
    pub chain_restarts: CounterVec,
    pub inner_node_failures: CounterVec,
    pub chains_paused: GaugeVec,

    // === Shutdown ===
    pub stop_timeouts: CounterVec,

    // === Front door ===
    pub rpc_requests: CounterVec,
    pub routed_chains: Gauge,
}

impl Metrics {
    fn new() -> Self {
        Self {
            virtual_node_starts: register_counter_vec!(
                "supernode_virtual_node_starts_total",
                "Virtual node start attempts",
                &["chain_id"]
            )
            .unwrap(),

            virtual_node_running: register_gauge_vec!(
                "supernode_virtual_node_running",
                "Whether the chain's virtual node is running (0 or 1)",
                &["chain_id"]
            )
            .unwrap(),

            chain_restarts: register_counter_vec!(
                "supernode_chain_restarts_total",
                "Restarts performed by a chain's supervision loop",
                &["chain_id"]
            )
            .unwrap(),

            inner_node_failures: register_counter_vec!(
                "supernode_inner_node_failures_total",
                "Virtual node runs that ended with an inner node error",
                &["chain_id"]
            )
            .unwrap(),

            chains_paused: register_gauge_vec!(
                "supernode_chain_paused",
                "Whether the chain container is paused (0 or 1)",
                &["chain_id"]
            )
            .unwrap(),

            stop_timeouts: register_counter_vec!(
                "supernode_stop_timeouts_total",
                "Bounded waits that expired during stop",
                &["component"]
            )
            .unwrap(),

            rpc_requests: register_counter_vec!(
                "supernode_rpc_requests_total",
                "Front-door requests by chain and outcome",
                &["chain_id", "outcome"]
            )
            .unwrap(),

            routed_chains: register_gauge!(
                "supernode_routed_chains",
                "Chains with a handler registered on the front door"
            )
            .unwrap(),
        }
    }
}

/// Get or initialize the global metrics instance.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Record a virtual node start attempt.
pub fn record_virtual_node_start(chain_id: ChainId) {
    metrics()
        .virtual_node_starts
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

/// Update whether the chain's virtual node is running.
pub fn set_virtual_node_running(chain_id: ChainId, running: bool) {
    metrics()
        .virtual_node_running
        .with_label_values(&[&chain_id.to_string()])
        .set(if running { 1.0 } else { 0.0 });
}

/// Record a supervision-loop restart.
pub fn record_chain_restart(chain_id: ChainId) {
    metrics()
        .chain_restarts
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

/// Record a run that ended with an inner node error.
pub fn record_inner_node_failure(chain_id: ChainId) {
    metrics()
        .inner_node_failures
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

/// Update the paused flag for a chain.
pub fn set_chain_paused(chain_id: ChainId, paused: bool) {
    metrics()
        .chains_paused
        .with_label_values(&[&chain_id.to_string()])
        .set(if paused { 1.0 } else { 0.0 });
}

/// Record an expired bounded wait.
///
/// **Cardinality control**: `component` is one of `"inner_node"`,
/// `"virtual_node"`, `"chain_container"`, `"listener"`.
pub fn record_stop_timeout(component: &str) {
    debug_assert!(
        matches!(
            component,
            "inner_node" | "virtual_node" | "chain_container" | "listener"
        ),
        "Unknown stop-timeout component: {}",
        component
    );
    metrics()
        .stop_timeouts
        .with_label_values(&[component])
        .inc();
}

/// Record a routed front-door request.
///
/// `outcome` is one of `"ok"`, `"error"`, `"unavailable"`, `"unknown_chain"`,
/// `"bad_request"`. Unknown chains must be recorded under a fixed key, never
/// the raw path segment.
pub fn record_rpc_request(chain_key: &str, outcome: &str) {
    metrics()
        .rpc_requests
        .with_label_values(&[chain_key, outcome])
        .inc();
}

/// Update the number of chains with a registered handler.
pub fn set_routed_chains(count: usize) {
    metrics().routed_chains.set(count as f64);
}
