//! Server lifecycle management

use radio_sfu::RoomRegistry;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::Config;
use crate::http;

pub struct RadioServer {
    config: Config,
    registry: Arc<RoomRegistry>,
}

impl RadioServer {
    pub const fn new(config: Config, registry: Arc<RoomRegistry>) -> Self {
        Self { config, registry }
    }

    /// Serve until a shutdown signal arrives or the listener fails
    pub async fn start(self) -> anyhow::Result<()> {
        let http_addr: std::net::SocketAddr = self
            .config
            .http_address()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{}': {e}", self.config.http_address()))?;

        let listener = tokio::net::TcpListener::bind(http_addr).await?;
        info!("HTTP server listening on {}", http_addr);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let router = http::create_router(Arc::clone(&self.registry));
        let mut http_handle = tokio::spawn(async move {
            let graceful = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }
            info!("HTTP server shut down gracefully");
        });

        tokio::select! {
            _ = &mut http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        // Close peer connections first so open sockets see their roles end
        self.registry.shutdown().await;
        let _ = shutdown_tx.send(true);
        if !http_handle.is_finished() {
            if let Err(e) = http_handle.await {
                error!("HTTP server task failed: {}", e);
            }
        }

        info!("Radio server stopped");
        Ok(())
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
