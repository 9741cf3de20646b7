//! API server lifecycle.
//!
//! [`start_server`] binds the listener and serves until `Ctrl-C`.
//! [`spawn_maintenance`] runs periodic sweeps in the background.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use spendguard_core::ServerConfig;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

/// Errors that can occur when starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server encountered a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(String),
}

/// Serve the API until `Ctrl-C`.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is invalid or taken and
/// [`ServerError::Serve`] on a fatal I/O error.
pub async fn start_server(config: &ServerConfig, state: Arc<AppState>) -> Result<(), ServerError> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ServerError::Bind(format!("invalid address: {e}")))?;

    let router = build_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))?;

    info!(%addr, "Spendguard API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServerError::Serve(format!("serve error: {e}")))?;

    info!("Spendguard API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Run [`maintenance`](spendguard_core::CostController::maintenance) every
/// `interval`. Failures are logged and the loop continues.
pub fn spawn_maintenance(state: Arc<AppState>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = state.controller.maintenance().await {
                tracing::warn!(error = %e, "Maintenance sweep failed");
            }
        }
    })
}
