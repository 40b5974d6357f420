//! Chain-keyed registry of request handlers.

use crate::metrics;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use supernode_core::RpcHandler;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from [`RpcRouter`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("router already closed")]
    AlreadyClosed,
}

/// Maps chain keys to the handler of that chain's current run.
///
/// Each chain only ever writes its own key, so registrations from different
/// chains never race. A chain's restart replaces its previous handler.
#[derive(Default)]
pub struct RpcRouter {
    handlers: RwLock<HashMap<String, RpcHandler>>,
    closed: AtomicBool,
}

impl RpcRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `key`, replacing any previous one.
    ///
    /// Ignored once the router is closed.
    pub fn set_handler(&self, key: &str, handler: RpcHandler) {
        if self.is_closed() {
            warn!(chain_id = key, "Ignoring handler registration on closed router");
            return;
        }
        let count = {
            let mut handlers = self.handlers.write();
            handlers.insert(key.to_string(), handler);
            handlers.len()
        };
        metrics::set_routed_chains(count);
        debug!(chain_id = key, "Registered RPC handler");
    }

    /// Current handler for `key`.
    pub fn handler(&self, key: &str) -> Option<RpcHandler> {
        self.handlers.read().get(key).cloned()
    }

    /// Registered chain keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.handlers.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop and release every registered handler.
    pub fn close(&self) -> Result<(), RouterError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(RouterError::AlreadyClosed);
        }
        let released: Vec<_> = self.handlers.write().drain().collect();
        for (_, handler) in &released {
            handler.stop();
        }
        metrics::set_routed_chains(0);
        debug!(released = released.len(), "RPC router closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_handler_wins() {
        let router = RpcRouter::new();
        let first = RpcHandler::new();
        let second = RpcHandler::new();

        router.set_handler("420", first.clone());
        router.set_handler("420", second.clone());

        assert!(router.handler("420").unwrap().same_as(&second));
        assert_eq!(router.keys(), vec!["420".to_string()]);
    }

    #[test]
    fn test_keys_are_independent() {
        let router = RpcRouter::new();
        router.set_handler("10", RpcHandler::new());
        router.set_handler("8453", RpcHandler::new());
        assert_eq!(router.keys(), vec!["10".to_string(), "8453".to_string()]);
        assert!(router.handler("11").is_none());
    }

    #[test]
    fn test_close_releases_and_stops_handlers() {
        let router = RpcRouter::new();
        let handler = RpcHandler::new();
        router.set_handler("10", handler.clone());

        router.close().unwrap();
        assert!(handler.is_stopped());
        assert!(router.handler("10").is_none());
        assert_eq!(router.close(), Err(RouterError::AlreadyClosed));
    }

    #[test]
    fn test_registration_after_close_ignored() {
        let router = RpcRouter::new();
        router.close().unwrap();
        router.set_handler("10", RpcHandler::new());
        assert!(router.handler("10").is_none());
    }
}
