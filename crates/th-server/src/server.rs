//! TCP listener
//!
//! Accepts peer connections and runs each one in its own task. Every task
//! gets a child of the server's shutdown token, so shutting down drives live
//! sessions through teardown before [`TermhostServer::run`] returns.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::connection::ConnectionSummary;
use crate::orchestrator::SessionOrchestrator;

/// Listener for peer connections
pub struct TermhostServer {
    listener: TcpListener,
    orchestrator: Arc<SessionOrchestrator>,
    shutdown: CancellationToken,
}

impl TermhostServer {
    /// Bind to an address (`host:port`, port 0 picks a free one)
    pub async fn bind(
        address: &str,
        orchestrator: Arc<SessionOrchestrator>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("Failed to bind to {}", address))?;

        Ok(Self {
            listener,
            orchestrator,
            shutdown,
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown, then wait for live ones to finish
    pub async fn run(self) -> Result<()> {
        tracing::info!("Listening on {}", self.local_addr()?);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let orchestrator = Arc::clone(&self.orchestrator);
                        let cancel = self.shutdown.child_token();
                        let span = tracing::info_span!("connection", peer = %peer_addr);
                        connections.spawn(
                            handle_connection(orchestrator, stream, peer_addr, cancel).instrument(span),
                        );
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Connection task failed: {}", e);
                    }
                }
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    break;
                }
            }
        }

        let live = connections.len();
        if live > 0 {
            tracing::info!("Waiting for {} connections to close", live);
        }
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Connection task failed: {}", e);
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    orchestrator: Arc<SessionOrchestrator>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    cancel: CancellationToken,
) -> ConnectionSummary {
    tracing::info!("Accepted connection from {}", peer_addr);
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Failed to set TCP_NODELAY: {}", e);
    }

    let summary = orchestrator.serve(stream, cancel).await;
    tracing::info!(
        "Connection from {} closed ({:?}, identity {:?})",
        peer_addr,
        summary.end,
        summary.identity.as_ref().map(|id| id.as_str())
    );
    summary
}
