//! Non-closing views over the shared upstream clients.
//!
//! Every inner node receives one of these instead of the real client. Inner
//! nodes close their sources on shutdown like any standalone node would;
//! the view turns that into a no-op so one chain's restart cannot tear down
//! a client the other chains are still using. Only the supernode closes the
//! underlying client, after every chain has stopped.

use async_trait::async_trait;
use std::sync::Arc;
use supernode_core::{BeaconSource, ClientError, L1Source};
use tracing::trace;

/// [`L1Source`] whose `close` does nothing.
#[derive(Clone)]
pub struct NonCloseableL1Source {
    inner: Arc<dyn L1Source>,
}

impl NonCloseableL1Source {
    pub fn new(inner: Arc<dyn L1Source>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl L1Source for NonCloseableL1Source {
    async fn chain_id(&self) -> Result<u64, ClientError> {
        self.inner.chain_id().await
    }

    async fn block_number(&self) -> Result<u64, ClientError> {
        self.inner.block_number().await
    }

    fn close(&self) {
        trace!("Ignoring close on shared L1 client");
    }
}

/// [`BeaconSource`] whose `close` does nothing.
#[derive(Clone)]
pub struct NonCloseableBeaconSource {
    inner: Arc<dyn BeaconSource>,
}

impl NonCloseableBeaconSource {
    pub fn new(inner: Arc<dyn BeaconSource>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl BeaconSource for NonCloseableBeaconSource {
    async fn genesis_time(&self) -> Result<u64, ClientError> {
        self.inner.genesis_time().await
    }

    async fn node_version(&self) -> Result<String, ClientError> {
        self.inner.node_version().await
    }

    fn close(&self) {
        trace!("Ignoring close on shared beacon client");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingL1 {
        closed: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl L1Source for CountingL1 {
        async fn chain_id(&self) -> Result<u64, ClientError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ClientError::Closed);
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }

        async fn block_number(&self) -> Result<u64, ClientError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ClientError::Closed);
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(100)
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CountingBeacon {
        closed: AtomicBool,
    }

    #[async_trait]
    impl BeaconSource for CountingBeacon {
        async fn genesis_time(&self) -> Result<u64, ClientError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ClientError::Closed);
            }
            Ok(1_606_824_023)
        }

        async fn node_version(&self) -> Result<String, ClientError> {
            Ok("Lighthouse/v5".into())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_closing_a_view_keeps_shared_client_usable() {
        let shared = Arc::new(CountingL1::default());
        let chain_a = NonCloseableL1Source::new(shared.clone());
        let chain_b = NonCloseableL1Source::new(shared.clone());

        chain_a.close();

        assert!(!shared.closed.load(Ordering::SeqCst));
        assert_eq!(chain_a.block_number().await, Ok(100));
        assert_eq!(chain_b.chain_id().await, Ok(1));
        assert_eq!(shared.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_owner_close_reaches_views() {
        let shared = Arc::new(CountingL1::default());
        let view = NonCloseableL1Source::new(shared.clone());

        shared.close();
        assert_eq!(view.block_number().await, Err(ClientError::Closed));
    }

    #[tokio::test]
    async fn test_beacon_view_ignores_close() {
        let shared = Arc::new(CountingBeacon::default());
        let view = NonCloseableBeaconSource::new(shared.clone());

        view.close();
        assert!(!shared.closed.load(Ordering::SeqCst));
        assert_eq!(view.genesis_time().await, Ok(1_606_824_023));
    }
}
