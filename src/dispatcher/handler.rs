//! `campaign-send` job handler.

use std::sync::Arc;

use crate::db::ClaimedJob;
use crate::error::{Error, Result};
use crate::jobs::{JobContext, JobHandler};
use crate::types::{JobKind, SendJobPayload};

use super::{DispatchOutcome, Dispatcher};

/// Runs the [`Dispatcher`] for queued send jobs
pub struct SendJobHandler {
    dispatcher: Arc<Dispatcher>,
}

impl SendJobHandler {
    /// Create a handler around `dispatcher`
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

fn parse_payload(job: &ClaimedJob) -> Result<SendJobPayload> {
    serde_json::from_str(&job.payload)
        .map_err(|e| Error::InvalidPayload(format!("send job {}: {}", job.id, e)))
}

#[async_trait::async_trait]
impl JobHandler for SendJobHandler {
    fn kind(&self) -> JobKind {
        JobKind::CampaignSend
    }

    async fn handle(&self, job: &ClaimedJob, ctx: &JobContext) -> Result<()> {
        let payload = parse_payload(job)?;

        match self.dispatcher.run(&payload, ctx).await? {
            DispatchOutcome::Sent(stats) => {
                tracing::debug!(
                    job_id = %job.id,
                    campaign_id = payload.campaign_id.0,
                    processed = stats.processed,
                    "Send job finished"
                );
            }
            DispatchOutcome::Paused | DispatchOutcome::AlreadySent => {}
        }
        Ok(())
    }

    async fn on_failure(&self, job: &ClaimedJob, error: &Error) {
        // Timeouts drop the dispatcher mid-send; the campaign still says `sending`
        if let Ok(payload) = parse_payload(job) {
            self.dispatcher
                .fail_campaign(payload.campaign_id, error)
                .await;
        }
    }
}
