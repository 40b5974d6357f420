//! HTTP request handlers for the front door.

use super::router::RpcRouter;
use crate::metrics;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use supernode_types::jsonrpc::{self, JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// Fixed metrics label for requests to chains that are not registered.
const UNKNOWN_CHAIN_LABEL: &str = "unknown";

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ChainsResponse {
    pub chains: Vec<String>,
}

/// Handler for `GET /health` - liveness probe.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Handler for `GET /chains` - chains with a registered handler.
pub async fn chains_handler(State(router): State<Arc<RpcRouter>>) -> impl IntoResponse {
    Json(ChainsResponse {
        chains: router.keys(),
    })
}

fn rpc_error(status: StatusCode, code: i64, message: &str) -> Response {
    (
        status,
        Json(JsonRpcResponse::failure(
            Value::Null,
            JsonRpcError::new(code, message),
        )),
    )
        .into_response()
}

/// Handler for `POST /{chain_id}` - route a JSON-RPC request to the chain's
/// current handler.
pub async fn dispatch_handler(
    State(router): State<Arc<RpcRouter>>,
    Path(chain): Path<String>,
    body: Bytes,
) -> Response {
    if router.is_closed() {
        metrics::record_rpc_request(UNKNOWN_CHAIN_LABEL, "unavailable");
        return rpc_error(
            StatusCode::SERVICE_UNAVAILABLE,
            jsonrpc::NODE_UNAVAILABLE,
            "supernode is shutting down",
        );
    }

    let Some(handler) = router.handler(&chain) else {
        metrics::record_rpc_request(UNKNOWN_CHAIN_LABEL, "unknown_chain");
        return rpc_error(
            StatusCode::NOT_FOUND,
            jsonrpc::METHOD_NOT_FOUND,
            &format!("no chain registered under {chain:?}"),
        );
    };

    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            metrics::record_rpc_request(&chain, "bad_request");
            return rpc_error(
                StatusCode::BAD_REQUEST,
                jsonrpc::PARSE_ERROR,
                &format!("invalid JSON-RPC request: {e}"),
            );
        }
    };

    let response = handler.handle(request).await;
    let (status, outcome) = match &response.error {
        Some(err) if err.code == jsonrpc::NODE_UNAVAILABLE => {
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
        Some(_) => (StatusCode::OK, "error"),
        None => (StatusCode::OK, "ok"),
    };
    metrics::record_rpc_request(&chain, outcome);

    (status, Json(response)).into_response()
}
