//! Health & Status API endpoints
//!
//! - GET /health  - pass summary (JSON)
//! - GET /healthz - liveness probe
//! - GET /readyz  - ready once both passes have observed a head
//! - GET /metrics - Prometheus metrics
//! - GET /status  - per-role cursor and counters

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::Result;
use prometheus::{Encoder, TextEncoder};
use relay_core::ChainRole;
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::manager::{PassStatus, SharedStatus};
use crate::metrics;

#[derive(Clone)]
pub struct AppState {
    pub status: SharedStatus,
    pub started: Instant,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub source_last_block: Option<u64>,
    pub destination_last_block: Option<u64>,
    pub unresolved: usize,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_seconds: u64,
    pub source: Option<PassStatus>,
    pub destination: Option<PassStatus>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.status.read().await;
    let degraded = status.values().any(|s| s.last_error.is_some());
    Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" },
        uptime_seconds: state.started.elapsed().as_secs(),
        source_last_block: status.get(&ChainRole::Source).and_then(|s| s.last_block),
        destination_last_block: status
            .get(&ChainRole::Destination)
            .and_then(|s| s.last_block),
        unresolved: status.values().map(|s| s.unresolved).sum(),
    })
}

async fn liveness() -> &'static str {
    "OK"
}

async fn readiness(State(state): State<AppState>) -> (StatusCode, &'static str) {
    let status = state.status.read().await;
    let ready = [ChainRole::Source, ChainRole::Destination]
        .iter()
        .all(|role| status.get(role).is_some_and(|s| s.head.is_some()));
    if ready {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY")
    }
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let status = state.status.read().await;
    Json(StatusResponse {
        uptime_seconds: state.started.elapsed().as_secs(),
        source: status.get(&ChainRole::Source).cloned(),
        destination: status.get(&ChainRole::Destination).cloned(),
    })
}

async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .route("/status", get(status))
        .with_state(state)
}

/// Serve the API until shutdown
pub async fn start_api_server(
    addr: SocketAddr,
    status: SharedStatus,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app = router(AppState {
        status,
        started: Instant::now(),
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server started");
    metrics::UP.set(1.0);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    metrics::UP.set(0.0);
    Ok(())
}
