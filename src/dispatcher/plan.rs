//! Send planning: batch size, limiter rate, per-list totals, quota check.

use tokio::sync::broadcast;

use crate::checkpoint::progress_percent;
use crate::config::DispatchConfig;
use crate::contact_source::ContactStore;
use crate::error::Result;
use crate::provider::SendQuota;
use crate::quota::{QuotaCheck, check_quota, effective_send_rate, limiter_rate};
use crate::types::{CampaignId, Checkpoint, ContactListId, Event};

/// Parameters fixed for the duration of one send attempt
#[derive(Clone, Debug, PartialEq)]
pub struct SendPlan {
    /// Contacts per checkpointed batch
    pub batch_size: usize,
    /// Rate-limiter tokens per second
    pub send_rate: f64,
    /// Members per list, in payload order; the space the cursor moves in
    pub list_totals: Vec<u64>,
    /// Deliverable contacts across all lists
    pub total_recipients: u64,
    /// Deliverable contacts not yet behind the checkpoint
    pub remaining_recipients: u64,
}

impl SendPlan {
    /// Count the lists and size batches from the provider quota
    pub async fn build(
        contacts: &dyn ContactStore,
        lists: &[ContactListId],
        checkpoint: &Checkpoint,
        quota: &SendQuota,
        config: &DispatchConfig,
    ) -> Result<Self> {
        let mut list_totals = Vec::with_capacity(lists.len());
        let mut total_recipients = 0;
        let mut remaining_recipients = 0;

        for (index, list_id) in lists.iter().enumerate() {
            list_totals.push(contacts.count_members(*list_id).await?);

            let deliverable = contacts.count_deliverable_from(*list_id, 0).await?;
            total_recipients += deliverable;

            let index = index as u64;
            if index == checkpoint.list_index && checkpoint.contact_index > 0 {
                remaining_recipients += contacts
                    .count_deliverable_from(*list_id, checkpoint.contact_index)
                    .await?;
            } else if index >= checkpoint.list_index {
                remaining_recipients += deliverable;
            }
        }

        Ok(Self {
            batch_size: effective_send_rate(quota.max_send_rate, config),
            send_rate: limiter_rate(quota.max_send_rate),
            list_totals,
            total_recipients,
            remaining_recipients,
        })
    }

    /// Progress for a cursor position
    pub fn percent(&self, list_index: u64, contact_index: u64) -> f32 {
        progress_percent(&self.list_totals, list_index, contact_index)
    }

    /// Apply the quota overrun policy to the recipients still ahead
    ///
    /// Under the proceed policy an overrun is logged and announced but not
    /// fatal.
    pub fn check_quota(
        &self,
        campaign_id: CampaignId,
        quota: &SendQuota,
        config: &DispatchConfig,
        event_tx: &broadcast::Sender<Event>,
    ) -> Result<()> {
        if let QuotaCheck::Overrun {
            required,
            remaining,
        } = check_quota(quota, self.remaining_recipients, config.quota_overrun)?
        {
            tracing::warn!(
                campaign_id = campaign_id.0,
                required,
                remaining,
                "Estimated recipients exceed remaining provider quota, proceeding"
            );
            let _ = event_tx.send(Event::QuotaWarning {
                campaign_id,
                required,
                remaining,
            });
        }

        Ok(())
    }
}
