use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use f2f_core::probe::HealthReport;
use serde::Serialize;
use std::sync::Arc;

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub capabilities_registered: usize,
    pub capabilities_available: usize,
    pub orchestrator_running: bool,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities_registered: state.registry().len(),
        capabilities_available: state.prober().snapshot().available_count(),
        orchestrator_running: state.orchestrator().status().running,
    })
}

/// Re-probe the host and return the tool health report.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    let snapshot = state.prober().probe().await;
    Json(snapshot.report.clone())
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
