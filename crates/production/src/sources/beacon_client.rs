//! Shared L1 beacon-node REST client.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use supernode_core::{BeaconSource, ClientError};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Genesis {
    genesis_time: String,
}

#[derive(Debug, Deserialize)]
struct Version {
    version: String,
}

/// REST client for an L1 beacon node (`/eth/v1/...` API).
pub struct L1BeaconClient {
    http: reqwest::Client,
    base: reqwest::Url,
    closed: AtomicBool,
}

impl L1BeaconClient {
    pub fn new(addr: &str, request_timeout: Duration) -> Result<Self, ClientError> {
        let mut base = reqwest::Url::parse(addr)
            .map_err(|e| ClientError::Transport(format!("invalid beacon address {addr}: {e}")))?;
        // Url::join drops the last path segment unless it ends in '/'.
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base,
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let url = self
            .base
            .join(path)
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Transport(format!("{path}: HTTP {status}")));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl BeaconSource for L1BeaconClient {
    async fn genesis_time(&self) -> Result<u64, ClientError> {
        let genesis: Genesis = self.get("eth/v1/beacon/genesis").await?;
        genesis
            .genesis_time
            .parse()
            .map_err(|e| ClientError::Decode(format!("genesis_time: {e}")))
    }

    async fn node_version(&self) -> Result<String, ClientError> {
        let version: Version = self.get("eth/v1/node/version").await?;
        Ok(version.version)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(addr = %self.base, "Beacon client closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};
    use serde_json::json;

    async fn serve_fake_beacon() -> String {
        let app = Router::new()
            .route(
                "/eth/v1/beacon/genesis",
                get(|| async { Json(json!({"data": {"genesis_time": "1606824023"}})) }),
            )
            .route(
                "/eth/v1/node/version",
                get(|| async { Json(json!({"data": {"version": "Lighthouse/v5.1.0"}})) }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_queries_beacon() {
        let addr = serve_fake_beacon().await;
        let client = L1BeaconClient::new(&addr, Duration::from_secs(5)).unwrap();

        assert_eq!(client.genesis_time().await.unwrap(), 1_606_824_023);
        assert_eq!(client.node_version().await.unwrap(), "Lighthouse/v5.1.0");
    }

    #[tokio::test]
    async fn test_closed_client_refuses_calls() {
        let addr = serve_fake_beacon().await;
        let client = L1BeaconClient::new(&addr, Duration::from_secs(5)).unwrap();

        client.close();
        assert_eq!(client.genesis_time().await, Err(ClientError::Closed));
    }
}
