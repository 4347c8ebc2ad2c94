//! HTTP listener for the pairing API.
//!
//! The server shares the service's shutdown token: cancelling it stops
//! accepting connections and lets in-flight requests drain.

use std::net::SocketAddr;

use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;

/// A running HTTP server.
pub struct PairingServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl PairingServer {
    /// Bind `addr` and serve `app` until `shutdown` is cancelled.
    pub async fn bind(
        addr: SocketAddr,
        app: Router,
        shutdown: CancellationToken,
    ) -> Result<Self, ServerError> {
        let startup_failed = |reason: String| ServerError::StartupFailed {
            addr: addr.to_string(),
            reason,
        };

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| startup_failed(format!("Failed to bind: {}", e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| startup_failed(format!("Failed to read local address: {}", e)))?;

        tracing::info!(addr = %local_addr, "Pairing API listening");

        let drained = shutdown.clone();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(drained.cancelled_owned())
                .await;
            match result {
                Ok(()) => tracing::info!("Pairing API stopped"),
                Err(e) => tracing::error!(error = %e, "Pairing API failed"),
            }
        });

        Ok(Self {
            local_addr,
            shutdown,
            handle,
        })
    }

    /// Address actually bound; differs from the requested one for port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Cancel the shutdown token (if nobody has yet) and wait for in-flight
    /// requests to finish.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Pairing API task did not exit cleanly");
        }
    }
}
