//! Scheduler dispatcher: moves due campaigns onto the send queue.
//!
//! Two pieces:
//! - [`SchedulePoller`] finds `draft` campaigns whose `scheduled_at` has
//!   passed and enqueues a `campaign-schedule` job for each
//! - [`ScheduleJobHandler`] runs that job: it marks the campaign `queued`,
//!   resolves sender defaults against the brand and enqueues the
//!   `campaign-send` job with a self-contained [`SendJobPayload`]
//!
//! Enqueuing the same campaign twice is absorbed by job-id deduplication in
//! the queue.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::db::{ClaimedJob, Database};
use crate::error::{CampaignError, Error, Result};
use crate::jobs::{JobContext, JobHandler, JobQueue};
use crate::types::{
    Brand, Campaign, CampaignId, CampaignStatus, Event, JobKind, ScheduleJobPayload,
    SendJobPayload,
};

/// Statuses a campaign may be queued from
const QUEUEABLE: [CampaignStatus; 4] = [
    CampaignStatus::Draft,
    CampaignStatus::Paused,
    CampaignStatus::Failed,
    CampaignStatus::Queued,
];

/// Build the send payload for `campaign`, falling back to brand defaults
pub fn build_send_payload(campaign: &Campaign, brand: &Brand) -> SendJobPayload {
    let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());

    SendJobPayload {
        campaign_id: campaign.id,
        brand_id: brand.id,
        user_id: campaign.user_id,
        contact_list_ids: campaign.contact_list_ids.clone(),
        from_name: non_empty(&campaign.from_name).unwrap_or_else(|| brand.from_name.clone()),
        from_email: non_empty(&campaign.from_email).unwrap_or_else(|| brand.from_email.clone()),
        reply_to: non_empty(&campaign.reply_to).or_else(|| brand.reply_to.clone()),
        subject: campaign.subject.clone(),
        provider_credentials: brand.credentials.clone(),
    }
}

/// Handles `campaign-schedule` jobs
pub struct ScheduleJobHandler {
    db: Arc<Database>,
    queue: JobQueue,
    event_tx: broadcast::Sender<Event>,
}

impl ScheduleJobHandler {
    /// Create a handler enqueuing send jobs on `queue`
    pub fn new(db: Arc<Database>, queue: JobQueue, event_tx: broadcast::Sender<Event>) -> Self {
        Self {
            db,
            queue,
            event_tx,
        }
    }

    /// Queue `campaign_id` for sending
    ///
    /// Returns the enqueued payload, or `None` when the campaign is already
    /// sending or sent.
    pub async fn promote(&self, campaign_id: CampaignId) -> Result<Option<SendJobPayload>> {
        let moved = self
            .db
            .transition_campaign_status(campaign_id, &QUEUEABLE, CampaignStatus::Queued)
            .await?;

        let campaign = self.db.require_campaign(campaign_id).await?;
        if !moved {
            return match campaign.status {
                CampaignStatus::Sending | CampaignStatus::Sent => {
                    tracing::info!(
                        campaign_id = campaign_id.0,
                        status = %campaign.status,
                        "Campaign already in progress or sent, nothing to schedule"
                    );
                    Ok(None)
                }
                other => Err(CampaignError::InvalidState {
                    id: campaign_id,
                    operation: "schedule".to_string(),
                    current_state: other.to_string(),
                }
                .into()),
            };
        }

        let brand = self
            .db
            .get_brand(campaign.brand_id)
            .await?
            .ok_or(Error::BrandNotFound(campaign.brand_id))?;

        let payload = build_send_payload(&campaign, &brand);
        let enqueued = self.queue.enqueue_send(&payload).await?;

        tracing::info!(
            campaign_id = campaign_id.0,
            brand_id = brand.id.0,
            lists = payload.contact_list_ids.len(),
            enqueued,
            "Campaign queued for sending"
        );
        let _ = self.event_tx.send(Event::CampaignQueued { campaign_id });

        Ok(Some(payload))
    }
}

fn parse_payload(job: &ClaimedJob) -> Result<ScheduleJobPayload> {
    serde_json::from_str(&job.payload)
        .map_err(|e| Error::InvalidPayload(format!("schedule job {}: {}", job.id, e)))
}

#[async_trait::async_trait]
impl JobHandler for ScheduleJobHandler {
    fn kind(&self) -> JobKind {
        JobKind::CampaignSchedule
    }

    async fn handle(&self, job: &ClaimedJob, _ctx: &JobContext) -> Result<()> {
        let payload = parse_payload(job)?;
        self.promote(payload.campaign_id).await?;
        Ok(())
    }

    async fn on_failure(&self, job: &ClaimedJob, error: &Error) {
        // A campaign left `queued` with no send job would never move again
        let Ok(payload) = parse_payload(job) else {
            return;
        };
        match self
            .db
            .mark_campaign_failed(payload.campaign_id, &error.to_string())
            .await
        {
            Ok(true) => {
                tracing::error!(
                    campaign_id = payload.campaign_id.0,
                    error = %error,
                    "Campaign could not be scheduled"
                );
                let _ = self.event_tx.send(Event::CampaignFailed {
                    campaign_id: payload.campaign_id,
                    error: error.to_string(),
                });
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(
                    campaign_id = payload.campaign_id.0,
                    error = %e,
                    "Failed to mark campaign failed"
                );
            }
        }
    }
}

/// Periodically enqueues schedule jobs for due campaigns
pub struct SchedulePoller {
    db: Arc<Database>,
    queue: JobQueue,
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl SchedulePoller {
    /// Create a poller
    pub fn new(
        db: Arc<Database>,
        queue: JobQueue,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            db,
            queue,
            config,
            cancel,
        }
    }

    /// Enqueue a schedule job for every due campaign; returns how many were new
    pub async fn poll_once(&self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let due = self.db.list_due_campaigns(now).await?;

        let mut enqueued = 0;
        for campaign_id in due {
            if self.queue.enqueue_schedule(campaign_id).await? {
                tracing::info!(campaign_id = campaign_id.0, "Scheduled campaign is due");
                enqueued += 1;
            }
        }
        Ok(enqueued)
    }

    /// Run the poll loop until cancelled
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        tracing::info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Schedule poller started"
        );
        let mut interval = tokio::time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!(error = %e, "Failed to poll for due campaigns");
                    }
                }
            }
        }

        tracing::info!("Schedule poller stopped");
    }
}
