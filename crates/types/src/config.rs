//! Runtime configuration for the supernode and its virtual nodes.
//!
//! These are fully-resolved values. File parsing and flag precedence live
//! in the binary and in [`crate::layers`] respectively.

use crate::ChainId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sub-path under a chain's data directory holding the safe-head database.
pub const SAFE_DB_SUBPATH: &str = "safe_db";

/// Resolve a per-chain persistence path: `<data_dir>/<chain_id>/<resource>`.
///
/// Deterministic in the chain id so a restarted chain finds its own state.
pub fn chain_sub_path(data_dir: &Path, chain_id: ChainId, resource: &str) -> PathBuf {
    data_dir.join(chain_id.to_string()).join(resource)
}

/// Listen configuration for an HTTP JSON-RPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Host or IP to bind.
    #[serde(default = "default_rpc_listen_addr")]
    pub listen_addr: String,
    /// Port to bind (0 lets the OS pick).
    #[serde(default = "default_rpc_listen_port")]
    pub listen_port: u16,
}

fn default_rpc_listen_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_rpc_listen_port() -> u16 {
    8545
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_rpc_listen_addr(),
            listen_port: default_rpc_listen_port(),
        }
    }
}

impl RpcConfig {
    /// `host:port` form, bracketing IPv6 literals.
    pub fn endpoint(&self) -> String {
        join_host_port(&self.listen_addr, self.listen_port)
    }
}

/// Metrics listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_metrics_listen_port")]
    pub listen_port: u16,
}

fn default_metrics_listen_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_metrics_listen_port() -> u16 {
    7300
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_metrics_listen_addr(),
            listen_port: default_metrics_listen_port(),
        }
    }
}

impl MetricsConfig {
    pub fn endpoint(&self) -> String {
        join_host_port(&self.listen_addr, self.listen_port)
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Peer-to-peer settings of a virtual node.
///
/// Virtual nodes never run their own p2p stack; the container forces
/// `disabled` on every restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct P2pConfig {
    #[serde(default)]
    pub disabled: bool,
}

/// Fully-resolved configuration for one virtual node.
///
/// The chain container owns one of these and re-derives the isolation,
/// persistence and RPC fields before every restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualNodeConfig {
    /// Chain this node follows.
    pub chain_id: ChainId,
    /// Execution-engine endpoint of the L2 chain.
    pub l2_engine_addr: String,
    /// Safe-head database location (set by the container).
    pub safe_db_path: Option<PathBuf>,
    /// Network isolation.
    pub p2p: P2pConfig,
    /// RPC listen configuration (inherited from the supernode).
    pub rpc: RpcConfig,
    /// The inner node's own metrics listener (disabled by the container).
    pub metrics: MetricsConfig,
    /// How often the inner node polls L1.
    pub l1_poll_interval: Duration,
    /// Consecutive upstream failures before the inner node gives up.
    pub l1_failure_threshold: u32,
}

impl VirtualNodeConfig {
    /// Configuration with compiled defaults for everything but the chain
    /// and its engine endpoint.
    pub fn new(chain_id: ChainId, l2_engine_addr: impl Into<String>) -> Self {
        Self {
            chain_id,
            l2_engine_addr: l2_engine_addr.into(),
            safe_db_path: None,
            p2p: P2pConfig::default(),
            rpc: RpcConfig::default(),
            metrics: MetricsConfig::default(),
            l1_poll_interval: DEFAULT_L1_POLL_INTERVAL,
            l1_failure_threshold: DEFAULT_L1_FAILURE_THRESHOLD,
        }
    }
}

pub const DEFAULT_L1_POLL_INTERVAL: Duration = Duration::from_secs(4);
pub const DEFAULT_L1_FAILURE_THRESHOLD: u32 = 5;

/// Delay policy between restarts of a chain's virtual node.
///
/// Restarts are unbounded; the policy only spaces them out. The delay
/// doubles after every consecutive short-lived run and resets once a run
/// lasts at least `stable_after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub stable_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            stable_after: Duration::from_secs(60),
        }
    }
}

impl RestartPolicy {
    /// Restart without any delay.
    pub fn immediate() -> Self {
        Self {
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            stable_after: Duration::ZERO,
        }
    }

    /// Delay before the restart following `consecutive_failures` short runs.
    ///
    /// Zero failures means the previous run was stable and the restart is
    /// immediate.
    pub fn backoff(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 || self.initial_backoff.is_zero() {
            return Duration::ZERO;
        }
        let shift = (consecutive_failures - 1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

/// Bounded waits used during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownTimeouts {
    /// Inner node `stop` and virtual node `stop` calls.
    pub node_stop: Duration,
    /// Waiting for a container's supervision loop to finish.
    pub container_stop: Duration,
    /// Graceful drain of the HTTP and metrics listeners.
    pub listener_shutdown: Duration,
}

impl Default for ShutdownTimeouts {
    fn default() -> Self {
        Self {
            node_stop: Duration::from_secs(5),
            container_stop: Duration::from_secs(10),
            listener_shutdown: Duration::ZERO,
        }
    }
}

/// Top-level supernode configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupernodeConfig {
    /// Chains to run, in configuration order.
    pub chains: Vec<ChainId>,
    /// Root of all per-chain persisted state.
    pub data_dir: PathBuf,
    /// Shared L1 execution-layer RPC endpoint.
    pub l1_node_addr: String,
    /// Optional shared L1 beacon endpoint.
    pub l1_beacon_addr: Option<String>,
    /// Front-door RPC listener (also inherited by every virtual node).
    pub rpc: RpcConfig,
    /// Aggregated metrics listener.
    pub metrics: MetricsConfig,
    pub restart: RestartPolicy,
    pub timeouts: ShutdownTimeouts,
}

impl SupernodeConfig {
    pub fn new(l1_node_addr: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            chains: Vec::new(),
            data_dir: data_dir.into(),
            l1_node_addr: l1_node_addr.into(),
            l1_beacon_addr: None,
            rpc: RpcConfig::default(),
            metrics: MetricsConfig::default(),
            restart: RestartPolicy::default(),
            timeouts: ShutdownTimeouts::default(),
        }
    }

    pub fn with_chains(mut self, chains: impl IntoIterator<Item = ChainId>) -> Self {
        self.chains = chains.into_iter().collect();
        self
    }

    pub fn with_beacon(mut self, addr: impl Into<String>) -> Self {
        self.l1_beacon_addr = Some(addr.into());
        self
    }

    pub fn with_rpc(mut self, rpc: RpcConfig) -> Self {
        self.rpc = rpc;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_restart_policy(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_timeouts(mut self, timeouts: ShutdownTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_sub_path() {
        let path = chain_sub_path(Path::new("/data"), ChainId(420), SAFE_DB_SUBPATH);
        assert_eq!(path, PathBuf::from("/data/420/safe_db"));
    }

    #[test]
    fn test_chain_sub_path_various_chains() {
        let cases = [
            (ChainId(10), "safe_db", "/data/10/safe_db"),
            (ChainId(11155420), "safe_db", "/data/11155420/safe_db"),
            (ChainId(8453), "peerstore", "/data/8453/peerstore"),
        ];
        for (chain, resource, expected) in cases {
            assert_eq!(
                chain_sub_path(Path::new("/data"), chain, resource),
                PathBuf::from(expected),
                "chain {chain}"
            );
        }
    }

    #[test]
    fn test_endpoint_formatting() {
        let rpc = RpcConfig {
            listen_addr: "127.0.0.1".into(),
            listen_port: 9545,
        };
        assert_eq!(rpc.endpoint(), "127.0.0.1:9545");

        let rpc = RpcConfig {
            listen_addr: "::1".into(),
            listen_port: 0,
        };
        assert_eq!(rpc.endpoint(), "[::1]:0");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RestartPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            stable_after: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(100), Duration::from_millis(500));
    }

    #[test]
    fn test_immediate_policy_never_waits() {
        let policy = RestartPolicy::immediate();
        assert_eq!(policy.backoff(7), Duration::ZERO);
    }

    #[test]
    fn test_metrics_disabled_by_default() {
        let config = SupernodeConfig::new("http://localhost:8545", "/data");
        assert!(!config.metrics.enabled);
        assert!(config.chains.is_empty());
        assert_eq!(config.timeouts.listener_shutdown, Duration::ZERO);
    }
}
