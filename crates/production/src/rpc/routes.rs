//! Route configuration for the front door.

use super::handlers::*;
use super::router::RpcRouter;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Create the front-door router.
///
/// Chain routes are resolved against the [`RpcRouter`] on every request, so
/// handlers registered after the listener starts are picked up.
pub fn create_router(router: Arc<RpcRouter>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/chains", get(chains_handler))
        .route("/{chain_id}", post(dispatch_handler))
        .route("/{chain_id}/", post(dispatch_handler))
        .with_state(router)
}
