//! Metrics listener.
//!
//! Exposes:
//! - `GET /metrics` - supernode process metrics (default registry)
//! - `GET /{chain_id}/metrics` - the metrics of that chain's current run
//! - `GET /health` - liveness probe

use crate::rpc::{HttpServer, HttpServerError};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parking_lot::RwLock;
use prometheus::{proto::MetricFamily, Encoder, Registry, TextEncoder};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Chain key to the registry of that chain's current run.
#[derive(Default)]
pub struct MetricsRouter {
    registries: RwLock<HashMap<String, Registry>>,
    closed: AtomicBool,
}

impl MetricsRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `registry` under `key`, replacing the previous run's.
    pub fn set_handler(&self, key: &str, registry: Registry) {
        if self.closed.load(Ordering::SeqCst) {
            warn!(chain_id = key, "Ignoring metrics registration on closed router");
            return;
        }
        self.registries.write().insert(key.to_string(), registry);
        debug!(chain_id = key, "Registered metrics registry");
    }

    pub fn registry(&self, key: &str) -> Option<Registry> {
        self.registries.read().get(key).cloned()
    }

    /// Drop every registry. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.registries.write().clear();
        true
    }
}

fn encode(families: &[MetricFamily]) -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(families, &mut buffer) {
        tracing::error!(error = ?e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }
    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

async fn process_metrics_handler() -> Response {
    encode(&prometheus::gather())
}

async fn chain_metrics_handler(
    State(router): State<Arc<MetricsRouter>>,
    Path(chain): Path<String>,
) -> Response {
    match router.registry(&chain) {
        Some(registry) => encode(&registry.gather()),
        None => (StatusCode::NOT_FOUND, format!("no metrics for chain {chain}")).into_response(),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Build the metrics app.
pub fn create_metrics_router(router: Arc<MetricsRouter>) -> Router {
    Router::new()
        .route("/metrics", get(process_metrics_handler))
        .route("/health", get(health_handler))
        .route("/{chain_id}/metrics", get(chain_metrics_handler))
        .with_state(router)
}

/// The metrics listener with a start/stop lifecycle.
pub struct MetricsService {
    server: HttpServer,
}

impl MetricsService {
    pub fn new(listen: impl Into<String>, router: Arc<MetricsRouter>) -> Self {
        Self {
            server: HttpServer::new("metrics", listen, create_metrics_router(router)),
        }
    }

    /// Bind and serve. `on_exit` is invoked if the listener stops with an
    /// error before [`stop`](Self::stop) is called; the task watching for
    /// that runs on `tracker`.
    pub async fn start<F>(
        &self,
        tracker: &TaskTracker,
        on_exit: F,
    ) -> Result<SocketAddr, HttpServerError>
    where
        F: FnOnce(std::io::Error) + Send + 'static,
    {
        let (addr, exit) = self.server.start().await?;
        tracker.spawn(async move {
            if let Ok(Err(e)) = exit.await {
                on_exit(e);
            }
        });
        Ok(addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    pub async fn stop(&self, timeout: Duration) -> Result<(), HttpServerError> {
        self.server.shutdown(timeout).await
    }
}
