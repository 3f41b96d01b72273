//! Capability and planning API handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use f2f_core::{
    planner::ConversionTarget, AppError, AvailabilitySnapshot, Capability, FileDetection,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use super::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// A registered capability with its availability on this host.
#[derive(Debug, Serialize)]
pub struct CapabilityResponse {
    #[serde(flatten)]
    pub capability: Capability,
    pub available: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

/// Request body for planning conversions.
///
/// Either `source_format` or `input` (a file path whose detected format is
/// planned from) is required. No targets means every reachable format.
#[derive(Debug, Deserialize)]
pub struct PlanBody {
    pub source_format: Option<String>,
    pub input: Option<PathBuf>,
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct DetectBody {
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub targets: Vec<ConversionTarget>,
}

fn describe(capability: &Capability, snapshot: &AvailabilitySnapshot) -> CapabilityResponse {
    let entry = snapshot.get(&capability.id);
    CapabilityResponse {
        capability: capability.clone(),
        available: entry.map(|e| e.available).unwrap_or(false),
        missing: entry.map(|e| e.missing.clone()).unwrap_or_default(),
        reasons: entry.map(|e| e.reasons.clone()).unwrap_or_default(),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// List registered capabilities
pub async fn list_capabilities(State(state): State<Arc<AppState>>) -> Json<Vec<CapabilityResponse>> {
    let snapshot = state.prober().snapshot();
    let capabilities = state
        .registry()
        .list()
        .into_iter()
        .map(|capability| describe(&capability, &snapshot))
        .collect();
    Json(capabilities)
}

/// Get a single capability
pub async fn get_capability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CapabilityResponse>> {
    let capability = state
        .registry()
        .get(&id)
        .ok_or_else(|| ApiError::not_found("capability", &id))?;
    Ok(Json(describe(&capability, &state.prober().snapshot())))
}

/// Rank conversion paths from a source format to the requested targets
pub async fn plan(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PlanBody>,
) -> ApiResult<Json<PlanResponse>> {
    let snapshot = state.prober().snapshot();
    let targets = match (&body.source_format, &body.input) {
        (Some(source), _) => state.planner().plan(&snapshot, source, &body.targets)?,
        (None, Some(input)) => state
            .planner()
            .plan_for_file(&snapshot, input, &body.targets)?,
        (None, None) => {
            return Err(ApiError::bad_request(
                "either source_format or input is required",
            ))
        }
    };
    Ok(Json(PlanResponse { targets }))
}

/// Detect the format of a file on the server host
pub async fn detect(Json(body): Json<DetectBody>) -> ApiResult<Json<FileDetection>> {
    let detection = tokio::task::spawn_blocking(move || f2f_core::detect(&body.path))
        .await
        .map_err(|e| AppError::Internal(format!("detection task failed: {}", e)))??;
    Ok(Json(detection))
}
