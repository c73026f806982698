//! Job handlers.

use super::JobsQuery;
use crate::api::AppState;
use crate::api::error_response::bad_request;
use crate::error::Error;
use crate::types::{JobId, JobInfo, JobState};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 1000;

/// GET /jobs - List jobs, newest first
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> Response {
    let filter = match query.state.as_deref().map(str::parse::<JobState>) {
        None => None,
        Some(Ok(job_state)) => Some(job_state),
        Some(Err(e)) => return bad_request(e.to_string()),
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    match state.engine.list_jobs(filter, limit).await {
        Ok(jobs) => (StatusCode::OK, Json(jobs)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /jobs/:id - Get single job
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, Error> {
    let id = JobId(id);
    state
        .engine
        .get_job(&id)
        .await?
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("job {}", id)))
}

/// POST /jobs/:id/retry - Give a dead job a fresh attempt budget
pub async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, Error> {
    state.engine.retry_job(&JobId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
