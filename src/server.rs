//! Operator health endpoint for a running worker pool

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

use crate::observability::MetricsSnapshot;
use crate::pool::{PoolHandle, PoolState};
use crate::processors::AnyError;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub pool_id: Uuid,
    pub state: PoolState,
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
}

pub fn router(handle: PoolHandle) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(handle)
}

/// Serve the health endpoint until the pool stops
pub async fn run(address: SocketAddr, handle: PoolHandle) -> Result<(), AnyError> {
    let app = router(handle.clone());

    let listener = TcpListener::bind(address).await?;
    info!(%address, "Health endpoint listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { handle.wait_stopped().await })
        .await?;

    Ok(())
}

async fn health(State(handle): State<PoolHandle>) -> impl IntoResponse {
    let state = handle.state();
    let (code, status) = match state {
        PoolState::Running | PoolState::Draining => (StatusCode::OK, "ok"),
        PoolState::Stopped => (StatusCode::SERVICE_UNAVAILABLE, "stopped"),
    };

    let body = HealthResponse {
        status,
        pool_id: handle.pool_id(),
        state,
        metrics: handle.metrics(),
    };

    (code, Json(body))
}

/// Resolve on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
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
