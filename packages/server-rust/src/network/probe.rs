//! Health, liveness, and readiness probes for the consumer worker.
//!
//! Served on a separate listener so orchestrators can watch the worker even
//! though it exposes no request API of its own.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

use super::shutdown::{HealthState, ShutdownController};

/// Shared state passed to the probe handlers.
#[derive(Clone)]
pub struct ProbeState {
    pub shutdown: Arc<ShutdownController>,
    /// Process start time, used for uptime.
    pub start_time: Instant,
}

impl ProbeState {
    #[must_use]
    pub fn new(shutdown: Arc<ShutdownController>) -> Self {
        Self {
            shutdown,
            start_time: Instant::now(),
        }
    }
}

/// Detailed health as JSON. Always 200; the `state` field carries the verdict.
pub async fn health_handler(State(state): State<ProbeState>) -> Json<serde_json::Value> {
    Json(json!({
        "state": state.shutdown.health_state().as_str(),
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Liveness probe: 200 while the process responds.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 only while the consumer loop is running.
pub async fn readiness_handler(State(state): State<ProbeState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Routes: `GET /health`, `GET /health/live`, `GET /health/ready`.
pub fn build_probe_router(state: ProbeState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .with_state(state)
}

/// Serves the probe routes on `addr` until the controller triggers shutdown.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn serve_probes(addr: SocketAddr, state: ProbeState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "health probes listening");

    let mut signal = state.shutdown.subscribe();
    let router = build_probe_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { signal.triggered().await })
        .await?;
    Ok(())
}
