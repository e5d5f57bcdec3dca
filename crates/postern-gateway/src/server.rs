//! TCP listener
//!
//! Accepts incoming connections and runs the router for each in its own
//! task, so a slow or silent handshake never blocks other connections.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::router::{ConnectionRouter, Routed};

/// Gateway server accepting inbound transport connections
pub struct GatewayServer {
    /// Connection router
    router: Arc<ConnectionRouter>,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
}

impl GatewayServer {
    /// Create a new gateway server
    pub fn new(router: Arc<ConnectionRouter>, cancel: CancellationToken) -> Self {
        Self { router, cancel }
    }

    /// Run the accept loop until shutdown
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;

        let local_addr = listener.local_addr()?;
        tracing::info!("Gateway listening on {}", local_addr);

        loop {
            tokio::select! {
                // Check for shutdown
                _ = self.cancel.cancelled() => {
                    tracing::info!("Gateway shutting down");
                    break;
                }

                // Accept new connections
                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => {
                            self.handle_connection(socket, peer_addr);
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Route a new inbound connection on its own task
    fn handle_connection(&self, socket: tokio::net::TcpStream, peer_addr: SocketAddr) {
        tracing::info!("New connection from {}", peer_addr);

        let router = Arc::clone(&self.router);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Routing cancelled for {}", peer_addr);
                    return;
                }
                result = router.route(Box::new(socket)) => result,
            };

            match result {
                Ok(Routed::Created(id)) => {
                    tracing::info!("Connection from {} opened session \"{}\"", peer_addr, id);
                }
                Ok(Routed::Joined(id)) => {
                    tracing::info!("Connection from {} joined session \"{}\"", peer_addr, id);
                }
                Err(e) => {
                    // Dropping the transport closed the connection
                    tracing::warn!("Connection from {} rejected: {}", peer_addr, e);
                }
            }
        });
    }
}
