//! Supernode
//!
//! Runs many virtual rollup nodes in one process behind one RPC endpoint.
//!
//! # Usage
//!
//! ```bash
//! # Start with configuration file
//! supernode --config supernode.toml
//!
//! # Override data directory and chain list
//! supernode --config supernode.toml --data-dir /var/lib/supernode --chains 10,420
//!
//! # Point one chain at a different engine
//! supernode --config supernode.toml --engine 420=http://op-geth-420:8551
//! ```
//!
//! # Configuration
//!
//! ```toml
//! [supernode]
//! data_dir = "./data"
//! l1_node_addr = "http://localhost:8545"
//! l1_beacon_addr = "http://localhost:5052"
//! chains = [10, 420]
//!
//! [supernode.rpc]
//! listen_addr = "127.0.0.1"
//! listen_port = 9545
//!
//! [supernode.metrics]
//! enabled = true
//! listen_port = 7300
//!
//! [supernode.restart]
//! initial_backoff_ms = 100
//! max_backoff_ms = 30000
//! stable_after_ms = 60000
//!
//! [supernode.timeouts]
//! inner_stop_timeout_ms = 5000
//! container_stop_timeout_ms = 10000
//! listener_shutdown_timeout_ms = 0
//!
//! [telemetry]
//! otlp_endpoint = "http://localhost:4317"
//!
//! [defaults]
//! l1_poll_interval_ms = 4000
//!
//! [chains.10]
//! l2_engine_addr = "http://op-geth-10:8551"
//!
//! [chains.420]
//! l2_engine_addr = "http://op-geth-420:8551"
//! l1_failure_threshold = 10
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use supernode_production::{
    init_telemetry, RequestStopFn, Supernode, SupernodeError, TelemetryConfig,
};
use supernode_types::{
    ChainConfigLayers, ChainId, ChainSettings, MetricsConfig, RestartPolicy, RpcConfig,
    ShutdownTimeouts, SupernodeConfig,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Upper bound on the whole ordered teardown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Supernode
///
/// Runs a virtual node per configured chain, sharing L1 clients and one
/// front-door RPC listener.
#[derive(Parser, Debug)]
#[command(name = "supernode")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Data directory (overrides config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// L1 execution RPC endpoint (overrides config)
    #[arg(long)]
    l1: Option<String>,

    /// L1 beacon endpoint (overrides config)
    #[arg(long)]
    l1_beacon: Option<String>,

    /// Front-door listen host (overrides config)
    #[arg(long)]
    rpc_addr: Option<String>,

    /// Front-door listen port (overrides config)
    #[arg(long)]
    rpc_port: Option<u16>,

    /// Enable the metrics listener (overrides config)
    #[arg(long)]
    metrics: bool,

    /// Metrics listen host (overrides config)
    #[arg(long)]
    metrics_addr: Option<String>,

    /// Metrics listen port (overrides config)
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Chains to run, comma separated (overrides config)
    #[arg(long, value_delimiter = ',')]
    chains: Vec<ChainId>,

    /// Per-chain engine override as `<chain_id>=<url>` (repeatable)
    #[arg(long = "engine", value_parser = parse_engine_override)]
    engines: Vec<(ChainId, String)>,

    /// Log filter directive (RUST_LOG wins when set)
    #[arg(long)]
    log_level: Option<String>,
}

fn parse_engine_override(s: &str) -> Result<(ChainId, String), String> {
    let (chain, addr) = s
        .split_once('=')
        .ok_or_else(|| format!("expected <chain_id>=<url>, got {s:?}"))?;
    let chain = chain.parse::<ChainId>().map_err(|e| e.to_string())?;
    if addr.is_empty() {
        return Err(format!("empty engine address for chain {chain}"));
    }
    Ok((chain, addr.to_string()))
}

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    supernode: SupernodeSection,

    #[serde(default)]
    telemetry: TelemetrySection,

    /// Global default layer for every chain.
    #[serde(default)]
    defaults: ChainSettings,

    /// Per-chain layer.
    #[serde(default)]
    chains: HashMap<ChainId, ChainSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct SupernodeSection {
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,

    l1_node_addr: String,

    #[serde(default)]
    l1_beacon_addr: Option<String>,

    #[serde(default)]
    chains: Vec<ChainId>,

    #[serde(default)]
    rpc: RpcConfig,

    #[serde(default)]
    metrics: MetricsConfig,

    #[serde(default)]
    restart: RestartSection,

    #[serde(default)]
    timeouts: TimeoutsSection,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RestartSection {
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    stable_after_ms: Option<u64>,
}

impl RestartSection {
    fn policy(&self) -> RestartPolicy {
        let defaults = RestartPolicy::default();
        RestartPolicy {
            initial_backoff: self
                .initial_backoff_ms
                .map_or(defaults.initial_backoff, Duration::from_millis),
            max_backoff: self
                .max_backoff_ms
                .map_or(defaults.max_backoff, Duration::from_millis),
            stable_after: self
                .stable_after_ms
                .map_or(defaults.stable_after, Duration::from_millis),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimeoutsSection {
    inner_stop_timeout_ms: Option<u64>,
    container_stop_timeout_ms: Option<u64>,
    listener_shutdown_timeout_ms: Option<u64>,
}

impl TimeoutsSection {
    fn timeouts(&self) -> ShutdownTimeouts {
        let defaults = ShutdownTimeouts::default();
        ShutdownTimeouts {
            node_stop: self
                .inner_stop_timeout_ms
                .map_or(defaults.node_stop, Duration::from_millis),
            container_stop: self
                .container_stop_timeout_ms
                .map_or(defaults.container_stop, Duration::from_millis),
            listener_shutdown: self
                .listener_shutdown_timeout_ms
                .map_or(defaults.listener_shutdown, Duration::from_millis),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TelemetrySection {
    #[serde(default = "default_service_name")]
    service_name: String,

    #[serde(default)]
    otlp_endpoint: Option<String>,

    #[serde(default = "default_sampling_ratio")]
    sampling_ratio: f64,
}

fn default_service_name() -> String {
    "supernode".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            otlp_endpoint: None,
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

impl FileConfig {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply CLI overrides to the configuration.
    fn apply_overrides(&mut self, cli: &Cli) {
        let section = &mut self.supernode;
        if let Some(ref data_dir) = cli.data_dir {
            section.data_dir = data_dir.clone();
        }
        if let Some(ref l1) = cli.l1 {
            section.l1_node_addr = l1.clone();
        }
        if let Some(ref beacon) = cli.l1_beacon {
            section.l1_beacon_addr = Some(beacon.clone());
        }
        if let Some(ref addr) = cli.rpc_addr {
            section.rpc.listen_addr = addr.clone();
        }
        if let Some(port) = cli.rpc_port {
            section.rpc.listen_port = port;
        }
        if cli.metrics {
            section.metrics.enabled = true;
        }
        if let Some(ref addr) = cli.metrics_addr {
            section.metrics.listen_addr = addr.clone();
        }
        if let Some(port) = cli.metrics_port {
            section.metrics.listen_port = port;
        }
        if !cli.chains.is_empty() {
            section.chains = cli.chains.clone();
        }
    }

    fn supernode_config(&self) -> Result<SupernodeConfig> {
        let section = &self.supernode;
        if section.chains.is_empty() {
            bail!("No chains configured (set supernode.chains or --chains)");
        }

        let mut config = SupernodeConfig::new(section.l1_node_addr.clone(), section.data_dir.clone())
            .with_chains(section.chains.iter().copied())
            .with_rpc(section.rpc.clone())
            .with_metrics(section.metrics.clone())
            .with_restart_policy(section.restart.policy())
            .with_timeouts(section.timeouts.timeouts());
        if let Some(ref beacon) = section.l1_beacon_addr {
            config = config.with_beacon(beacon.clone());
        }
        Ok(config)
    }

    fn layers(&self, engines: &[(ChainId, String)]) -> ChainConfigLayers {
        engines.iter().fold(
            ChainConfigLayers::new(self.defaults.clone(), self.chains.clone()),
            |layers, (chain_id, addr)| {
                layers.with_override(
                    *chain_id,
                    ChainSettings {
                        l2_engine_addr: Some(addr.clone()),
                        ..Default::default()
                    },
                )
            },
        )
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut file = FileConfig::load(&cli.config)?;
    file.apply_overrides(&cli);

    let telemetry = init_telemetry(&TelemetryConfig {
        service_name: file.telemetry.service_name.clone(),
        log_filter: cli.log_level.clone(),
        otlp_endpoint: file.telemetry.otlp_endpoint.clone(),
        sampling_ratio: file.telemetry.sampling_ratio,
        resource_attributes: vec![(
            "chains".to_string(),
            file.supernode
                .chains
                .iter()
                .map(ChainId::to_string)
                .collect::<Vec<_>>()
                .join(","),
        )],
    })
    .context("Failed to initialize telemetry")?;

    info!("Supernode starting...");

    let config = file.supernode_config()?;
    let chain_configs = file
        .layers(&cli.engines)
        .resolve_all(&config.chains)
        .context("Invalid chain configuration")?;

    fs::create_dir_all(&config.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.data_dir.display()
        )
    })?;

    info!(
        chains = ?config.chains,
        data_dir = %config.data_dir.display(),
        rpc = %config.rpc.endpoint(),
        metrics = config.metrics.enabled,
        "Configuration loaded"
    );

    let ctx = CancellationToken::new();
    let request_stop: RequestStopFn = {
        let ctx = ctx.clone();
        Arc::new(move |err: SupernodeError| {
            error!(error = %err, "Stop requested");
            ctx.cancel();
        })
    };

    let supernode = Supernode::builder(config)
        .chain_configs(chain_configs)
        .request_stop(request_stop)
        .build()
        .context("Failed to build supernode")?;

    tokio::spawn({
        let ctx = ctx.clone();
        async move {
            tokio::select! {
                _ = shutdown_signal() => {
                    info!("Initiating graceful shutdown...");
                    ctx.cancel();
                }
                _ = ctx.cancelled() => {}
            }
        }
    });

    info!("Supernode started, press Ctrl+C to stop");
    match supernode.start(ctx.clone()).await {
        Ok(()) | Err(SupernodeError::Cancelled) => {}
        Err(e) => error!(error = %e, "Supernode exited with error"),
    }

    if tokio::time::timeout(SHUTDOWN_DEADLINE, supernode.stop())
        .await
        .is_err()
    {
        warn!(deadline = ?SHUTDOWN_DEADLINE, "Shutdown deadline exceeded");
    }

    info!("Supernode shutdown complete");
    telemetry.shutdown().await;
    Ok(())
}
