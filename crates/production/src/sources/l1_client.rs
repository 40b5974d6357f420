//! Shared L1 execution-layer JSON-RPC client.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use supernode_core::{ClientError, L1Source};
use supernode_types::{JsonRpcRequest, JsonRpcResponse};
use tracing::debug;

/// Configuration for [`L1Client`].
#[derive(Debug, Clone)]
pub struct L1ClientConfig {
    /// HTTP(S) endpoint of the L1 node.
    pub addr: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl L1ClientConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// JSON-RPC client for an L1 execution node.
///
/// Safe for concurrent use by every inner node. Construction does not
/// connect; the first request does.
pub struct L1Client {
    http: reqwest::Client,
    addr: reqwest::Url,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl L1Client {
    pub fn new(config: L1ClientConfig) -> Result<Self, ClientError> {
        let addr = reqwest::Url::parse(&config.addr)
            .map_err(|e| ClientError::Transport(format!("invalid L1 address {}: {e}", config.addr)))?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            addr,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    pub fn addr(&self) -> &str {
        self.addr.as_str()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);

        let response = self
            .http
            .post(self.addr.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Transport(format!("{method}: HTTP {status}")));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        if let Some(err) = body.error {
            return Err(ClientError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        let result = body
            .result
            .ok_or_else(|| ClientError::Decode(format!("{method}: missing result")))?;
        serde_json::from_value(result).map_err(|e| ClientError::Decode(e.to_string()))
    }
}

/// Parse an Ethereum hex quantity such as `"0x1a"`.
pub(crate) fn parse_quantity(value: &str) -> Result<u64, ClientError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| ClientError::Decode(format!("quantity without 0x prefix: {value:?}")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| ClientError::Decode(format!("invalid quantity {value:?}: {e}")))
}

#[async_trait]
impl L1Source for L1Client {
    async fn chain_id(&self) -> Result<u64, ClientError> {
        let raw: String = self.call("eth_chainId", json!([])).await?;
        parse_quantity(&raw)
    }

    async fn block_number(&self) -> Result<u64, ClientError> {
        let raw: String = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&raw)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(addr = %self.addr, "L1 client closed");
        }
    }
}
