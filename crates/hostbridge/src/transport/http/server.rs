//! HTTP server implementation.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::service::BridgeService;

use super::routes::routes;

/// Serve the RPC transport on `config.host:config.http_port` until SIGINT,
/// SIGTERM, or `POST /shutdown`.
pub async fn serve_http<S: 'static>(
    config: &BridgeConfig,
    service: Arc<BridgeService<S>>,
) -> anyhow::Result<()> {
    let addr = config.http_addr()?;
    let listener = TcpListener::bind(addr).await?;
    serve_http_on(listener, service).await
}

/// Serve on an already-bound listener (port 0 in tests).
pub async fn serve_http_on<S: 'static>(
    listener: TcpListener,
    service: Arc<BridgeService<S>>,
) -> anyhow::Result<()> {
    let shutdown_rx = service.shutdown_rx();
    let actual_addr = listener.local_addr()?;
    let app = routes(Arc::clone(&service));

    info!("Starting hostbridge RPC server on {}", actual_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_rx))
        .await?;

    info!("RPC server shutdown complete");

    // Other transports sharing this service stop too.
    service.trigger_shutdown();

    Ok(())
}

/// Wait for shutdown signal (SIGTERM, SIGINT, or /shutdown endpoint).
///
/// A signal handler that cannot be installed is logged and ignored; the
/// remaining sources still work.
async fn shutdown_signal(mut shutdown_rx: watch::Receiver<bool>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let explicit_shutdown = async {
        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = explicit_shutdown => {
            info!("Shutdown requested, stopping RPC server...");
        }
    }
}
