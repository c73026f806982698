//! Operator actions: schedule, pause, resume, inspect.

use std::sync::atomic::Ordering;

use serde::{Deserialize, Serialize};

use crate::checkpoint::progress_percent;
use crate::error::{CampaignError, Error, Result};
use crate::types::{Campaign, CampaignId, CampaignStatus, JobId, JobInfo, JobState};

use super::DispatchEngine;

/// A campaign with its current progress
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CampaignReport {
    /// The stored campaign, including stats and checkpoint
    #[serde(flatten)]
    pub campaign: Campaign,
    /// Deliverable contacts across the campaign's lists right now
    pub total_contacts: u64,
    /// Progress percentage (0.0 to 100.0)
    pub percent: f32,
}

impl DispatchEngine {
    fn ensure_accepting(&self) -> Result<()> {
        if self.accepting_new.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }

    /// Queue a campaign for sending now, regardless of `scheduled_at`
    ///
    /// Accepted from `draft`, `paused`, `failed` and `queued`. Returns the id
    /// of the schedule job.
    pub async fn schedule_now(&self, id: CampaignId) -> Result<JobId> {
        self.ensure_accepting()?;
        let campaign = self.db.require_campaign(id).await?;

        match campaign.status {
            CampaignStatus::Draft
            | CampaignStatus::Paused
            | CampaignStatus::Failed
            | CampaignStatus::Queued => {}
            other => {
                return Err(CampaignError::InvalidState {
                    id,
                    operation: "send".to_string(),
                    current_state: other.to_string(),
                }
                .into());
            }
        }

        self.queue.enqueue_schedule(id).await?;
        tracing::info!(campaign_id = id.0, "Campaign send requested");
        Ok(JobId::schedule(id))
    }

    /// Pause a queued or sending campaign
    ///
    /// A running send stops at its next batch boundary with a resumable
    /// checkpoint. Pausing a paused campaign is a no-op.
    pub async fn pause_campaign(&self, id: CampaignId) -> Result<()> {
        let moved = self
            .db
            .transition_campaign_status(
                id,
                &[CampaignStatus::Queued, CampaignStatus::Sending],
                CampaignStatus::Paused,
            )
            .await?;

        if moved {
            tracing::info!(campaign_id = id.0, "Campaign paused");
            return Ok(());
        }

        match self.db.require_campaign(id).await?.status {
            CampaignStatus::Paused => Ok(()),
            other => Err(CampaignError::InvalidState {
                id,
                operation: "pause".to_string(),
                current_state: other.to_string(),
            }
            .into()),
        }
    }

    /// Re-queue a paused or failed campaign; the send continues from its
    /// checkpoint
    pub async fn resume_campaign(&self, id: CampaignId) -> Result<JobId> {
        self.ensure_accepting()?;
        let campaign = self.db.require_campaign(id).await?;

        if !matches!(
            campaign.status,
            CampaignStatus::Paused | CampaignStatus::Failed
        ) {
            return Err(CampaignError::InvalidState {
                id,
                operation: "resume".to_string(),
                current_state: campaign.status.to_string(),
            }
            .into());
        }

        self.queue.enqueue_schedule(id).await?;
        tracing::info!(
            campaign_id = id.0,
            list_index = campaign.checkpoint.list_index,
            contact_index = campaign.checkpoint.contact_index,
            "Campaign resume requested"
        );
        Ok(JobId::schedule(id))
    }

    /// Campaign status, stats, checkpoint and progress
    pub async fn campaign_report(&self, id: CampaignId) -> Result<CampaignReport> {
        let campaign = self.db.require_campaign(id).await?;

        // Progress is measured in list positions, the recipient total in
        // contacts that can still be emailed
        let mut list_totals = Vec::with_capacity(campaign.contact_list_ids.len());
        let mut total_contacts = 0;
        for list_id in &campaign.contact_list_ids {
            list_totals.push(self.db.count_list_contacts(*list_id).await?);
            total_contacts += self.db.count_deliverable_contacts(*list_id).await?;
        }

        let percent = match campaign.status {
            CampaignStatus::Sent => 100.0,
            CampaignStatus::Draft => 0.0,
            _ if !campaign.checkpoint.has_more_to_process => 0.0,
            _ => progress_percent(
                &list_totals,
                campaign.checkpoint.list_index,
                campaign.checkpoint.contact_index,
            ),
        };

        Ok(CampaignReport {
            total_contacts,
            percent,
            campaign,
        })
    }

    /// List jobs, newest first, optionally filtered by state
    pub async fn list_jobs(&self, state: Option<JobState>, limit: u32) -> Result<Vec<JobInfo>> {
        self.queue.list(state, limit).await
    }

    /// Get a job by ID
    pub async fn get_job(&self, id: &JobId) -> Result<Option<JobInfo>> {
        self.queue.get(id).await
    }

    /// Give a dead job a fresh attempt budget
    pub async fn retry_job(&self, id: &JobId) -> Result<()> {
        self.ensure_accepting()?;
        self.queue.retry_dead(id).await
    }
}
