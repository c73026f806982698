//! Durable checkpoint commits for a running send.
//!
//! Every write is retried in place with the commit retry policy; a batch is
//! never attempted until the commit in front of it succeeded.

use crate::config::RetryConfig;
use crate::db::{BatchOutcome, Database};
use crate::error::Result;
use crate::retry::retry_with_backoff;
use crate::types::CampaignId;

/// Writes checkpoint and counter updates for one campaign
pub struct CheckpointWriter<'a> {
    db: &'a Database,
    campaign_id: CampaignId,
    retry: &'a RetryConfig,
}

impl<'a> CheckpointWriter<'a> {
    /// Create a writer for `campaign_id`
    pub fn new(db: &'a Database, campaign_id: CampaignId, retry: &'a RetryConfig) -> Self {
        Self {
            db,
            campaign_id,
            retry,
        }
    }

    /// Persist the cursor at the start of a batch, before any send in it
    pub async fn begin_batch(&self, list_index: u64, contact_index: u64) -> Result<()> {
        let applied = retry_with_backoff(self.retry, "commit_checkpoint", || {
            self.db
                .commit_checkpoint_position(self.campaign_id, list_index, contact_index)
        })
        .await?;

        if !applied {
            tracing::debug!(
                campaign_id = self.campaign_id.0,
                list_index,
                contact_index,
                "Checkpoint already ahead of batch start"
            );
        }
        Ok(())
    }

    /// Advance past a finished batch and add its outcome to the counters
    pub async fn finish_batch(
        &self,
        list_index: u64,
        next_contact_index: u64,
        outcome: &BatchOutcome,
    ) -> Result<()> {
        retry_with_backoff(self.retry, "record_batch", || {
            self.db
                .record_batch(self.campaign_id, list_index, next_contact_index, outcome)
        })
        .await
    }

    /// Move the cursor to the start of list `next_list_index`
    pub async fn finish_list(&self, next_list_index: u64) -> Result<()> {
        retry_with_backoff(self.retry, "advance_checkpoint_list", || {
            self.db.advance_to_list(self.campaign_id, next_list_index)
        })
        .await
    }
}

/// Overall progress of a send, from the cursor and per-list totals
///
/// An empty campaign counts as complete.
pub fn progress_percent(list_totals: &[u64], list_index: u64, contact_index: u64) -> f32 {
    let total: u64 = list_totals.iter().sum();
    if total == 0 {
        return 100.0;
    }

    let done_lists: u64 = list_totals
        .iter()
        .take(list_index.min(list_totals.len() as u64) as usize)
        .sum();
    let done = (done_lists + contact_index).min(total);

    (done as f64 / total as f64 * 100.0) as f32
}
