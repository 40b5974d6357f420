//! Per-run JSON-RPC method table.
//!
//! A chain container creates a new [`RpcHandler`] for every virtual node
//! start, registers it on the front-door router, and hands it to the inner
//! node which registers its methods. When the run ends the container stops
//! the handler so the router never serves a dead instance.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use supernode_types::jsonrpc::{
    self, JsonRpcError, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION,
};

type MethodFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, JsonRpcError>> + Send + Sync>;

#[derive(Default)]
struct HandlerInner {
    methods: RwLock<HashMap<String, MethodFn>>,
    stopped: AtomicBool,
}

/// Cheaply cloneable; clones share the method table and stopped flag.
#[derive(Clone, Default)]
pub struct RpcHandler {
    inner: Arc<HandlerInner>,
}

impl RpcHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a method.
    pub fn register<F, Fut>(&self, method: impl Into<String>, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JsonRpcError>> + Send + 'static,
    {
        let f: MethodFn = Arc::new(move |params| f(params).boxed());
        self.inner.methods.write().insert(method.into(), f);
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.methods.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Refuse all further requests.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Whether `other` is a clone of this handler.
    pub fn same_as(&self, other: &RpcHandler) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Dispatch one request.
    pub async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();

        if self.is_stopped() {
            return JsonRpcResponse::failure(
                id,
                JsonRpcError::new(jsonrpc::NODE_UNAVAILABLE, "node is not running"),
            );
        }

        if request.jsonrpc != JSONRPC_VERSION {
            return JsonRpcResponse::failure(
                id,
                JsonRpcError::new(jsonrpc::INVALID_REQUEST, "unsupported jsonrpc version"),
            );
        }

        // Clone out so the lock is not held across the call.
        let method = self.inner.methods.read().get(&request.method).cloned();
        let Some(method) = method else {
            return JsonRpcResponse::failure(
                id,
                JsonRpcError::new(
                    jsonrpc::METHOD_NOT_FOUND,
                    format!("the method {} does not exist/is not available", request.method),
                ),
            );
        };

        match method(request.params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => JsonRpcResponse::failure(id, err),
        }
    }
}

impl fmt::Debug for RpcHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcHandler")
            .field("methods", &self.methods())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
