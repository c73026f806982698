//! Batch dispatcher: the send loop for one campaign.
//!
//! For each target list, starting at the checkpoint, list members are read in
//! chunks and split into batches sized from the provider's rate. The cursor
//! counts members of every status, so suppressing a contact that was already
//! sent to never shifts the ones still ahead. Each batch:
//!
//! 1. checks for a pause or shutdown request
//! 2. commits the checkpoint at the batch start (before any send)
//! 3. sends to every contact under the rate limiter; per-recipient
//!    rejections are counted, provider-level errors abort the send
//! 4. advances the checkpoint past the batch and adds its counters in one
//!    statement
//!
//! A crash inside step 3 resends that batch on resume (at-least-once). A
//! pause or crash between batches resends nothing.
//!
//! - [`plan`] - batch size, limiter rate, list totals and the quota check
//! - [`message`] - per-contact rendering
//! - [`handler`] - the `campaign-send` job handler

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::checkpoint::CheckpointWriter;
use crate::config::Config;
use crate::contact_source::ContactSource;
use crate::db::{BatchOutcome, Database};
use crate::error::{CampaignError, Error, Result};
use crate::jobs::JobContext;
use crate::provider::{MailTransport, TransportFactory};
use crate::rate_limiter::RateLimiter;
use crate::secrets::decrypt_credentials;
use crate::types::{
    Campaign, CampaignId, CampaignStats, CampaignStatus, Contact, Event, SendJobPayload,
};

mod handler;
mod message;
mod plan;

pub use handler::SendJobHandler;
pub use message::MessageTemplate;
pub use plan::SendPlan;

/// How a send attempt ended without error
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every list was exhausted; the campaign is `sent`
    Sent(CampaignStats),
    /// The campaign was paused; the checkpoint is resumable
    Paused,
    /// The campaign was already `sent`; nothing was done
    AlreadySent,
}

enum BatchGate {
    Proceed,
    Stop(DispatchOutcome),
}

/// Runs campaign sends
pub struct Dispatcher {
    db: Arc<Database>,
    transports: Arc<dyn TransportFactory>,
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(
        db: Arc<Database>,
        transports: Arc<dyn TransportFactory>,
        config: Arc<Config>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            db,
            transports,
            config,
            event_tx,
        }
    }

    /// Run one send attempt for the campaign in `payload`
    ///
    /// On error the campaign is marked `failed` with its checkpoint intact,
    /// except for shutdown, which leaves it `sending` for the next process.
    pub async fn run(&self, payload: &SendJobPayload, ctx: &JobContext) -> Result<DispatchOutcome> {
        let result = self.dispatch(payload, ctx).await;
        if let Err(e) = &result {
            self.fail_campaign(payload.campaign_id, e).await;
        }
        result
    }

    /// Mark an in-flight campaign failed after `error`
    ///
    /// No-op for shutdown and for campaigns no longer queued or sending.
    pub async fn fail_campaign(&self, campaign_id: CampaignId, error: &Error) {
        if matches!(error, Error::ShuttingDown) {
            return;
        }

        match self
            .db
            .mark_campaign_failed(campaign_id, &error.to_string())
            .await
        {
            Ok(true) => {
                tracing::error!(campaign_id = campaign_id.0, error = %error, "Campaign send failed");
                let _ = self.event_tx.send(Event::CampaignFailed {
                    campaign_id,
                    error: error.to_string(),
                });
            }
            Ok(false) => {}
            Err(db_error) => {
                tracing::error!(
                    campaign_id = campaign_id.0,
                    error = %db_error,
                    send_error = %error,
                    "Failed to mark campaign failed"
                );
            }
        }
    }

    async fn dispatch(&self, payload: &SendJobPayload, ctx: &JobContext) -> Result<DispatchOutcome> {
        let campaign_id = payload.campaign_id;

        let campaign = match self.begin_sending(campaign_id).await? {
            Ok(campaign) => campaign,
            Err(outcome) => return Ok(outcome),
        };

        payload.validate()?;
        let credentials = decrypt_credentials(
            &payload.provider_credentials,
            self.config.secrets.encryption_key.as_deref(),
        )?;
        let transport = self.transports.create(&credentials)?;
        let quota = transport.get_send_quota().await?;

        let resumed = campaign.checkpoint.has_more_to_process;
        let checkpoint = if resumed {
            self.db.mark_send_resumed(campaign_id).await?;
            campaign.checkpoint.clone()
        } else {
            self.db
                .reset_checkpoint_for_new_send(campaign_id, chrono::Utc::now().timestamp())
                .await?;
            Default::default()
        };

        let dispatch = &self.config.dispatch;
        let plan = SendPlan::build(
            self.db.as_ref(),
            &payload.contact_list_ids,
            &checkpoint,
            &quota,
            dispatch,
        )
        .await?;
        plan.check_quota(campaign_id, &quota, dispatch, &self.event_tx)?;

        tracing::info!(
            campaign_id = campaign_id.0,
            job_id = %ctx.job_id(),
            resumed,
            list_index = checkpoint.list_index,
            contact_index = checkpoint.contact_index,
            total_contacts = plan.total_recipients,
            remaining = plan.remaining_recipients,
            batch_size = plan.batch_size,
            send_rate = plan.send_rate,
            "Campaign send started"
        );
        let _ = self.event_tx.send(Event::CampaignStarted {
            campaign_id,
            resumed,
            total_contacts: plan.total_recipients,
        });

        let limiter = RateLimiter::new(plan.send_rate);
        let template = MessageTemplate::new(payload, &campaign);
        let writer = CheckpointWriter::new(&self.db, campaign_id, &dispatch.commit_retry);

        let start_list = checkpoint.list_index as usize;
        for (list_index, list_id) in payload
            .contact_list_ids
            .iter()
            .enumerate()
            .skip(start_list)
        {
            let list_index = list_index as u64;
            let start_offset = if list_index == checkpoint.list_index {
                checkpoint.contact_index
            } else {
                0
            };

            let mut source =
                ContactSource::new(self.db.as_ref(), *list_id, start_offset, dispatch.chunk_size);
            let mut offset = start_offset;

            while let Some(chunk) = source.next_chunk().await? {
                for batch in chunk.chunks(plan.batch_size) {
                    if let BatchGate::Stop(outcome) = self.gate_batch(campaign_id, ctx).await? {
                        return Ok(outcome);
                    }

                    writer.begin_batch(list_index, offset).await?;

                    let outcome = self
                        .send_batch(campaign_id, transport.as_ref(), &limiter, &template, batch)
                        .await?;
                    offset += batch.len() as u64;

                    writer.finish_batch(list_index, offset, &outcome).await?;

                    let percent = plan.percent(list_index, offset);
                    tracing::debug!(
                        campaign_id = campaign_id.0,
                        list_index,
                        contact_index = offset,
                        sent = outcome.sent,
                        bounced = outcome.bounced,
                        percent,
                        "Batch committed"
                    );
                    let _ = self.event_tx.send(Event::CampaignProgress {
                        campaign_id,
                        percent,
                        list_index,
                        contact_index: offset,
                    });
                    ctx.report_progress(percent).await;
                }
            }

            writer.finish_list(list_index + 1).await?;
            tracing::debug!(
                campaign_id = campaign_id.0,
                list_index,
                list_id = list_id.0,
                "List exhausted"
            );
        }

        self.db.mark_campaign_sent(campaign_id).await?;
        let stats = self.db.require_campaign(campaign_id).await?.stats;

        tracing::info!(
            campaign_id = campaign_id.0,
            processed = stats.processed,
            sent = stats.sent,
            bounces = stats.bounces,
            "Campaign sent"
        );
        let _ = self.event_tx.send(Event::CampaignSent { campaign_id, stats });

        Ok(DispatchOutcome::Sent(stats))
    }

    /// Move the campaign to `sending`, or explain why there is nothing to do
    async fn begin_sending(
        &self,
        campaign_id: CampaignId,
    ) -> Result<std::result::Result<Campaign, DispatchOutcome>> {
        let moved = self
            .db
            .transition_campaign_status(
                campaign_id,
                &[
                    CampaignStatus::Queued,
                    CampaignStatus::Sending,
                    CampaignStatus::Failed,
                ],
                CampaignStatus::Sending,
            )
            .await?;

        let campaign = self.db.require_campaign(campaign_id).await?;
        if moved {
            return Ok(Ok(campaign));
        }

        match campaign.status {
            CampaignStatus::Paused => {
                tracing::info!(campaign_id = campaign_id.0, "Campaign paused before send started");
                Ok(Err(DispatchOutcome::Paused))
            }
            CampaignStatus::Sent => {
                tracing::info!(campaign_id = campaign_id.0, "Campaign already sent");
                Ok(Err(DispatchOutcome::AlreadySent))
            }
            other => Err(CampaignError::InvalidState {
                id: campaign_id,
                operation: "send".to_string(),
                current_state: other.to_string(),
            }
            .into()),
        }
    }

    /// Checked at the top of every batch
    async fn gate_batch(&self, campaign_id: CampaignId, ctx: &JobContext) -> Result<BatchGate> {
        if ctx.is_cancelled() {
            tracing::info!(campaign_id = campaign_id.0, "Stopping send for shutdown");
            return Err(Error::ShuttingDown);
        }

        match self.db.get_campaign_status(campaign_id).await? {
            Some(CampaignStatus::Sending) => Ok(BatchGate::Proceed),
            // Paused and resumed while this send was still running
            Some(CampaignStatus::Queued) => {
                self.db
                    .transition_campaign_status(
                        campaign_id,
                        &[CampaignStatus::Queued],
                        CampaignStatus::Sending,
                    )
                    .await?;
                Ok(BatchGate::Proceed)
            }
            Some(CampaignStatus::Paused) => {
                tracing::info!(campaign_id = campaign_id.0, "Campaign paused, stopping at batch boundary");
                let _ = self.event_tx.send(Event::CampaignPaused { campaign_id });
                Ok(BatchGate::Stop(DispatchOutcome::Paused))
            }
            Some(other) => Err(CampaignError::InvalidState {
                id: campaign_id,
                operation: "continue sending".to_string(),
                current_state: other.to_string(),
            }
            .into()),
            None => Err(CampaignError::NotFound { id: campaign_id }.into()),
        }
    }

    /// Send to every deliverable contact in `batch`, isolating per-recipient
    /// rejections
    ///
    /// Members that bounced, complained or unsubscribed are skipped without
    /// counting; they still occupy their list position.
    async fn send_batch(
        &self,
        campaign_id: CampaignId,
        transport: &dyn MailTransport,
        limiter: &RateLimiter,
        template: &MessageTemplate,
        batch: &[Contact],
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        for contact in batch {
            if !contact.status.is_deliverable() {
                continue;
            }
            limiter.acquire().await;

            match transport.send(&template.render(contact)).await {
                Ok(_) => outcome.sent += 1,
                Err(e) if e.is_recipient_level() => {
                    tracing::debug!(
                        campaign_id = campaign_id.0,
                        contact_id = contact.id.0,
                        error = %e,
                        "Recipient rejected"
                    );
                    outcome.bounced += 1;
                }
                Err(e) => return Err(e.into()),
            }
            outcome.processed += 1;
        }

        if outcome.bounced > 0 {
            tracing::warn!(
                campaign_id = campaign_id.0,
                bounced = outcome.bounced,
                batch_size = batch.len(),
                "Recipients rejected in batch"
            );
        }

        Ok(outcome)
    }
}
