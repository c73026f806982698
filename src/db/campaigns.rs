//! Campaign records: status transitions, checkpoint and statistics updates.

use crate::error::{CampaignError, DatabaseError};
use crate::types::{
    BrandId, Campaign, CampaignId, CampaignStats, CampaignStatus, Checkpoint, ContactListId,
    NewCampaign,
};
use crate::{Error, Result};

use super::{CampaignRow, Database, from_unix};

const CAMPAIGN_COLUMNS: &str = r#"
    id, brand_id, user_id, name, subject, html_body, text_body,
    from_name, from_email, reply_to, contact_list_ids, status,
    scheduled_at, sent_at, error_message,
    stat_processed, stat_sent, stat_failed, stat_bounces,
    cp_list_index, cp_contact_index, cp_processed_batches, cp_has_more, cp_started_at,
    created_at, updated_at
"#;

impl TryFrom<CampaignRow> for Campaign {
    type Error = Error;

    fn try_from(row: CampaignRow) -> Result<Self> {
        let contact_list_ids: Vec<ContactListId> = serde_json::from_str(&row.contact_list_ids)?;

        Ok(Campaign {
            id: CampaignId(row.id),
            brand_id: BrandId(row.brand_id),
            user_id: row.user_id,
            name: row.name,
            subject: row.subject,
            html_body: row.html_body,
            text_body: row.text_body,
            from_name: row.from_name,
            from_email: row.from_email,
            reply_to: row.reply_to,
            contact_list_ids,
            status: CampaignStatus::from_i32(row.status),
            scheduled_at: row.scheduled_at,
            sent_at: row.sent_at.map(from_unix),
            error_message: row.error_message,
            stats: CampaignStats {
                processed: row.stat_processed.max(0) as u64,
                sent: row.stat_sent.max(0) as u64,
                failed: row.stat_failed.max(0) as u64,
                bounces: row.stat_bounces.max(0) as u64,
            },
            checkpoint: Checkpoint {
                list_index: row.cp_list_index.max(0) as u64,
                contact_index: row.cp_contact_index.max(0) as u64,
                processed_batches: row.cp_processed_batches.max(0) as u64,
                has_more_to_process: row.cp_has_more != 0,
                started_at: row.cp_started_at.map(from_unix),
            },
            created_at: from_unix(row.created_at),
            updated_at: from_unix(row.updated_at),
        })
    }
}

fn status_list(statuses: &[CampaignStatus]) -> String {
    statuses
        .iter()
        .map(|s| s.to_i32().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Database {
    /// Insert a new campaign in `draft` status
    pub async fn insert_campaign(&self, campaign: &NewCampaign) -> Result<CampaignId> {
        let now = chrono::Utc::now().timestamp();
        let list_ids = serde_json::to_string(&campaign.contact_list_ids)?;

        let result = sqlx::query(
            r#"
            INSERT INTO campaigns (
                brand_id, user_id, name, subject, html_body, text_body,
                from_name, from_email, reply_to, contact_list_ids,
                status, scheduled_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(campaign.brand_id)
        .bind(campaign.user_id)
        .bind(&campaign.name)
        .bind(&campaign.subject)
        .bind(&campaign.html_body)
        .bind(&campaign.text_body)
        .bind(&campaign.from_name)
        .bind(&campaign.from_email)
        .bind(&campaign.reply_to)
        .bind(list_ids)
        .bind(CampaignStatus::Draft.to_i32())
        .bind(campaign.scheduled_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert campaign: {}",
                e
            )))
        })?;

        Ok(CampaignId(result.last_insert_rowid()))
    }

    /// Get a campaign by ID
    pub async fn get_campaign(&self, id: CampaignId) -> Result<Option<Campaign>> {
        let row = sqlx::query_as::<_, CampaignRow>(&format!(
            "SELECT {} FROM campaigns WHERE id = ?",
            CAMPAIGN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get campaign: {}",
                e
            )))
        })?;

        row.map(Campaign::try_from).transpose()
    }

    /// Get a campaign by ID, failing with [`CampaignError::NotFound`] if missing
    pub async fn require_campaign(&self, id: CampaignId) -> Result<Campaign> {
        self.get_campaign(id)
            .await?
            .ok_or(Error::Campaign(CampaignError::NotFound { id }))
    }

    /// Read just the status column
    ///
    /// Cheap enough to call at the top of every batch.
    pub async fn get_campaign_status(&self, id: CampaignId) -> Result<Option<CampaignStatus>> {
        let status: Option<i32> = sqlx::query_scalar("SELECT status FROM campaigns WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get campaign status: {}",
                    e
                )))
            })?;

        Ok(status.map(CampaignStatus::from_i32))
    }

    /// Atomically move a campaign to `to` if its current status is one of `from`
    ///
    /// Returns false (and changes nothing) when the campaign is in any other
    /// status or does not exist.
    pub async fn transition_campaign_status(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }

        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(&format!(
            "UPDATE campaigns SET status = ?, updated_at = ? WHERE id = ? AND status IN ({})",
            status_list(from)
        ))
        .bind(to.to_i32())
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to transition campaign status: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Reset checkpoint and dispatcher-owned counters for a brand-new send
    ///
    /// `stat_failed` belongs to the delivery-notification consumer and is left alone.
    pub async fn reset_checkpoint_for_new_send(
        &self,
        id: CampaignId,
        started_at: i64,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE campaigns SET
                cp_list_index = 0,
                cp_contact_index = 0,
                cp_processed_batches = 0,
                cp_has_more = 1,
                cp_started_at = ?,
                stat_processed = 0,
                stat_sent = 0,
                stat_bounces = 0,
                error_message = NULL,
                sent_at = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(started_at)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to reset checkpoint: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Mark a resumed send as in flight again without touching its cursor
    pub async fn mark_send_resumed(&self, id: CampaignId) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE campaigns SET cp_has_more = 1, error_message = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark send resumed: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Persist the cursor position before a batch is attempted
    ///
    /// The update only applies if it does not move the cursor backwards;
    /// returns false when it was refused.
    pub async fn commit_checkpoint_position(
        &self,
        id: CampaignId,
        list_index: u64,
        contact_index: u64,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let list_index = list_index as i64;
        let contact_index = contact_index as i64;

        let result = sqlx::query(
            r#"
            UPDATE campaigns SET
                cp_list_index = ?,
                cp_contact_index = ?,
                cp_has_more = 1,
                updated_at = ?
            WHERE id = ?
              AND (cp_list_index < ? OR (cp_list_index = ? AND cp_contact_index <= ?))
            "#,
        )
        .bind(list_index)
        .bind(contact_index)
        .bind(now)
        .bind(id)
        .bind(list_index)
        .bind(list_index)
        .bind(contact_index)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit checkpoint: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a completed batch in one statement: advance the cursor past it,
    /// add its outcome to the counters, and bump the batch counter
    pub async fn record_batch(
        &self,
        id: CampaignId,
        list_index: u64,
        next_contact_index: u64,
        outcome: &BatchOutcome,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE campaigns SET
                stat_processed = stat_processed + ?,
                stat_sent = stat_sent + ?,
                stat_bounces = stat_bounces + ?,
                cp_processed_batches = cp_processed_batches + 1,
                cp_list_index = ?,
                cp_contact_index = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(outcome.processed as i64)
        .bind(outcome.sent as i64)
        .bind(outcome.bounced as i64)
        .bind(list_index as i64)
        .bind(next_contact_index as i64)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record batch: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Move the cursor to the start of the next list
    pub async fn advance_to_list(&self, id: CampaignId, list_index: u64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE campaigns SET cp_list_index = ?, cp_contact_index = 0, updated_at = ?
            WHERE id = ? AND cp_list_index < ?
            "#,
        )
        .bind(list_index as i64)
        .bind(now)
        .bind(id)
        .bind(list_index as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to advance checkpoint list: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Finish a send: status `sent`, `sent_at = now`, nothing left to process
    pub async fn mark_campaign_sent(&self, id: CampaignId) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE campaigns SET
                status = ?,
                sent_at = ?,
                cp_has_more = 0,
                error_message = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(CampaignStatus::Sent.to_i32())
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark campaign sent: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Mark an in-flight campaign failed, keeping its checkpoint resumable
    ///
    /// Only `queued` or `sending` campaigns are touched, so a campaign paused
    /// or finished in the meantime keeps its status.
    pub async fn mark_campaign_failed(&self, id: CampaignId, error: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(&format!(
            r#"
            UPDATE campaigns SET
                status = ?,
                cp_has_more = 1,
                error_message = ?,
                updated_at = ?
            WHERE id = ? AND status IN ({})
            "#,
            status_list(&[CampaignStatus::Queued, CampaignStatus::Sending])
        ))
        .bind(CampaignStatus::Failed.to_i32())
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark campaign failed: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Draft campaigns whose scheduled time has arrived
    pub async fn list_due_campaigns(&self, now: i64) -> Result<Vec<CampaignId>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM campaigns
            WHERE status = ? AND scheduled_at IS NOT NULL AND scheduled_at <= ?
            ORDER BY scheduled_at ASC, id ASC
            "#,
        )
        .bind(CampaignStatus::Draft.to_i32())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list due campaigns: {}",
                e
            )))
        })?;

        Ok(ids.into_iter().map(CampaignId).collect())
    }
}

/// Outcome of one processed batch, as added to the campaign counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Contacts attempted
    pub processed: u64,
    /// Accepted by the provider
    pub sent: u64,
    /// Rejected by the provider
    pub bounced: u64,
}
