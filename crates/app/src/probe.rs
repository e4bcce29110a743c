//! Liveness/readiness probes and the metrics snapshot, served on a side
//! port away from the control stream.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use viva_telemetry::OrchestratorMetrics;

use crate::health::HealthMonitor;

#[derive(Clone)]
pub struct ProbeState {
    pub metrics: OrchestratorMetrics,
    pub health: Arc<HealthMonitor>,
}

pub fn probe_router(metrics: OrchestratorMetrics, health: Arc<HealthMonitor>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_snapshot))
        .with_state(ProbeState { metrics, health })
}

async fn healthz(State(state): State<ProbeState>) -> impl IntoResponse {
    if state.health.all_healthy() {
        (StatusCode::OK, "ok\n")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy\n")
    }
}

async fn readyz() -> impl IntoResponse {
    (StatusCode::OK, "ok\n")
}

async fn metrics_snapshot(State(state): State<ProbeState>) -> impl IntoResponse {
    state.metrics.render_text()
}
