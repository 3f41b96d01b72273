//! Job API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use f2f_core::{
    orchestrator::{Artifact, JobFilter, LogEntry},
    CreateJobRequest, Job, JobAction, JobState,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Maximum allowed limit for job queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for job queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response for job creation: one id per input file, in input order
#[derive(Debug, Serialize)]
pub struct CreateJobsResponse {
    pub job_ids: Vec<String>,
}

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    /// Filter by state
    pub state: Option<String>,
    /// Maximum number of jobs to return
    pub limit: Option<i64>,
    /// Pagination offset
    pub offset: Option<i64>,
}

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<Job>,
    pub limit: i64,
    pub offset: i64,
}

/// Request body for job control
#[derive(Debug, Deserialize)]
pub struct ControlBody {
    pub action: JobAction,
}

/// Query parameters for fetching logs
#[derive(Debug, Deserialize)]
pub struct LogsParams {
    /// Return entries with a sequence strictly above this
    pub cursor: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub entries: Vec<LogEntry>,
    /// Cursor for the next call
    pub next_cursor: u64,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create one job per input file
pub async fn create_jobs(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<CreateJobsResponse>)> {
    let job_ids = state.orchestrator().create(body).await?;
    Ok((StatusCode::CREATED, Json(CreateJobsResponse { job_ids })))
}

/// List jobs, newest first
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> ApiResult<Json<ListJobsResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = JobFilter::new().with_limit(limit).with_offset(offset);
    if let Some(name) = &params.state {
        let job_state = JobState::parse(name)
            .ok_or_else(|| ApiError::bad_request(format!("unknown job state: {}", name)))?;
        filter = filter.with_state(job_state);
    }

    let jobs = state.orchestrator().list(&filter)?;
    Ok(Json(ListJobsResponse {
        jobs,
        limit,
        offset,
    }))
}

/// Get a job by id
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(require_job(&state, &id)?))
}

/// Pause, resume, cancel or retry a job
pub async fn control_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ControlBody>,
) -> ApiResult<Json<Job>> {
    require_job(&state, &id)?;
    let job = state.orchestrator().control(&id, body.action).await?;
    Ok(Json(job))
}

/// Artifacts produced by a job
pub async fn get_artifacts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Artifact>>> {
    require_job(&state, &id)?;
    Ok(Json(state.orchestrator().get_artifacts(&id)?))
}

/// Job log entries after a cursor
pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<LogsParams>,
) -> ApiResult<Json<LogsResponse>> {
    require_job(&state, &id)?;
    let cursor = params.cursor.unwrap_or(0);
    let entries = state.orchestrator().get_logs(&id, Some(cursor))?;
    let next_cursor = entries.last().map(|e| e.sequence).unwrap_or(cursor);
    Ok(Json(LogsResponse {
        entries,
        next_cursor,
    }))
}

/// Unknown ids are a 404 rather than a validation error.
fn require_job(state: &AppState, id: &str) -> ApiResult<Job> {
    state
        .orchestrator()
        .get(id)?
        .ok_or_else(|| ApiError::not_found("job", id))
}
