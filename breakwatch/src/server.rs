//! Server lifecycle management
//!
//! Starts the cluster registry and the HTTP server, then waits for a
//! shutdown signal and tears both down.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use breakwatch_cluster::ClusterRegistry;
use breakwatch_core::Config;

/// Upper bound on waiting for the HTTP server to drain
const HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct BreakwatchServer {
    config: Config,
    registry: ClusterRegistry,
}

impl BreakwatchServer {
    pub const fn new(config: Config, registry: ClusterRegistry) -> Self {
        Self { config, registry }
    }

    /// Start all components and wait for shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        info!("Starting breakwatch server...");

        // Create shutdown signal channel
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut supervisor = self.registry.start();
        let mut http_handle = self.start_http_server(shutdown_rx).await?;

        info!("All components started successfully");

        tokio::select! {
            _ = &mut supervisor => {
                error!("Cluster registry stopped unexpectedly");
            }
            _ = &mut http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        // Ends every open SSE stream
        let _ = shutdown_tx.send(true);
        self.registry.shutdown();

        if !http_handle.is_finished() && tokio::time::timeout(HTTP_DRAIN_TIMEOUT, http_handle).await.is_err() {
            warn!("HTTP server did not drain within {:?}", HTTP_DRAIN_TIMEOUT);
        }

        info!("breakwatch server shut down complete");
        Ok(())
    }

    /// Start HTTP server with graceful shutdown support
    async fn start_http_server(&self, shutdown_rx: watch::Receiver<bool>) -> anyhow::Result<JoinHandle<()>> {
        let http_addr: std::net::SocketAddr = self
            .config
            .http_address()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{}': {e}", self.config.http_address()))?;

        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;
        info!("HTTP server listening on {}", http_addr);

        let router = breakwatch_api::create_router(self.registry.clone(), shutdown_rx.clone());

        let handle = tokio::spawn(async move {
            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.wait_for(|stopping| *stopping).await;
            };

            if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(graceful).await {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        });

        Ok(handle)
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
