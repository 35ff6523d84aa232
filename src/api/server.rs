use std::net::SocketAddr;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{error, info};

use super::{
    services::{get_results, health, hello, submit_basic, submit_rendered},
    state::AppState,
};
use crate::config::Config;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// All relay routes over the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(hello).post(submit_basic))
        .route("/rendered", axum::routing::post(submit_rendered))
        .route("/health", get(health))
        .route("/{job_id}", get(get_results))
        .with_state(state)
        // Automatically decompress gzip request bodies
        .layer(RequestDecompressionLayer::new())
}

pub async fn run(config: Config, address: SocketAddr) -> Result<(), AnyError> {
    info!(path = %config.relay.storage_dir.display(), "Preparing storage directory");
    tokio::fs::create_dir_all(&config.relay.storage_dir)
        .await
        .map_err(|e| format!("Failed to create storage directory: {}", e))?;

    let state = AppState::from_config(config);
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "RelayBox relay listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
