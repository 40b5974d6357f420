//! HTTP listener shared by the front door and the metrics service.

use axum::Router;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Errors from the HTTP server.
#[derive(Debug, Error)]
pub enum HttpServerError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server already started")]
    AlreadyStarted,

    #[error("Server did not shut down within {0:?}")]
    ShutdownTimeout(Duration),
}

/// Resolves with the serve result once the listener exits for any reason.
pub type ServeExit = oneshot::Receiver<Result<(), std::io::Error>>;

struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// An axum app bound to a listen address.
///
/// Binding happens in [`HttpServer::start`], so the bound address (including
/// an OS-assigned port) is known before serving begins.
pub struct HttpServer {
    name: &'static str,
    listen: String,
    app: Mutex<Option<Router>>,
    running: Mutex<Option<Running>>,
}

impl HttpServer {
    pub fn new(name: &'static str, listen: impl Into<String>, app: Router) -> Self {
        Self {
            name,
            listen: listen.into(),
            app: Mutex::new(Some(app)),
            running: Mutex::new(None),
        }
    }

    /// Bind and start serving in the background.
    pub async fn start(&self) -> Result<(SocketAddr, ServeExit), HttpServerError> {
        let app = self.app.lock().take().ok_or(HttpServerError::AlreadyStarted)?;

        let bind_err = |source| HttpServerError::Bind {
            addr: self.listen.clone(),
            source,
        };
        let listener = TcpListener::bind(&self.listen).await.map_err(bind_err)?;
        let addr = listener.local_addr().map_err(bind_err)?;
        info!(server = self.name, addr = %addr, "HTTP server listening");

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone().cancelled_owned();
        let (exit_tx, exit_rx) = oneshot::channel();
        let name = self.name;

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await;
            if let Err(e) = &result {
                error!(server = name, error = ?e, "HTTP server error");
            }
            let _ = exit_tx.send(result);
        });

        *self.running.lock() = Some(Running {
            addr,
            shutdown,
            task,
        });
        Ok((addr, exit_rx))
    }

    /// Address the server is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.addr)
    }

    /// Stop accepting connections and wait for in-flight requests.
    ///
    /// A zero `timeout` aborts immediately without waiting.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), HttpServerError> {
        let Some(running) = self.running.lock().take() else {
            return Ok(());
        };
        running.shutdown.cancel();

        let mut task = running.task;
        if timeout.is_zero() {
            task.abort();
            return Ok(());
        }

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(_) => Ok(()),
            Err(_) => {
                warn!(server = self.name, ?timeout, "HTTP server shutdown timed out");
                task.abort();
                Err(HttpServerError::ShutdownTimeout(timeout))
            }
        }
    }
}
