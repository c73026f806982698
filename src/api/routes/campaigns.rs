//! Campaign handlers.

use super::JobAccepted;
use crate::api::AppState;
use crate::engine::CampaignReport;
use crate::error::Error;
use crate::types::CampaignId;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

/// GET /campaigns/:id - Status, stats, checkpoint and progress
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CampaignReport>, Error> {
    let report = state.engine.campaign_report(CampaignId(id)).await?;
    Ok(Json(report))
}

/// POST /campaigns/:id/send - Queue the campaign for sending now
pub async fn send_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<JobAccepted>), Error> {
    let job_id = state.engine.schedule_now(CampaignId(id)).await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id })))
}

/// POST /campaigns/:id/pause - Pause at the next batch boundary
pub async fn pause_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, Error> {
    state.engine.pause_campaign(CampaignId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /campaigns/:id/resume - Resume a paused or failed campaign
pub async fn resume_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<JobAccepted>), Error> {
    let job_id = state.engine.resume_campaign(CampaignId(id)).await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id })))
}
