//! Database layer for campaign-dispatch
//!
//! SQLite persistence for campaigns, contacts, brands, and the job queue.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`campaigns`] - Campaign records, status transitions, checkpoint and stats updates
//! - [`contacts`] - Contact lists and paged deliverable-contact reads
//! - [`brands`] - Sender defaults and provider credentials
//! - [`jobs`] - Durable job queue (enqueue, claim, retry, recovery)
//! - [`state`] - Runtime state (shutdown tracking)
//!
//! Campaign rows are only ever changed column by column (`x = x + ?` for
//! counters), never rewritten wholesale, so concurrent writers updating
//! unrelated columns are not clobbered.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

use crate::types::ProviderCredentials;

mod brands;
mod campaigns;
mod contacts;
mod jobs;
mod migrations;
mod state;

pub use campaigns::BatchOutcome;
pub use jobs::{ClaimedJob, Enqueued, FailureOutcome, JobCompletion, NewJob};

/// Fields needed to create a brand
#[derive(Debug, Clone, Default)]
pub struct NewBrand {
    /// Display name
    pub name: String,
    /// Default sender display name
    pub from_name: String,
    /// Default sender address
    pub from_email: String,
    /// Default reply-to address
    pub reply_to: Option<String>,
    /// Provider credentials (secret may already be encrypted)
    pub credentials: ProviderCredentials,
}

/// Campaign record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub(crate) struct CampaignRow {
    pub id: i64,
    pub brand_id: i64,
    pub user_id: Option<i64>,
    pub name: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    pub from_name: Option<String>,
    pub from_email: Option<String>,
    pub reply_to: Option<String>,
    /// JSON array of list ids
    pub contact_list_ids: String,
    pub status: i32,
    pub scheduled_at: Option<i64>,
    pub sent_at: Option<i64>,
    pub error_message: Option<String>,
    pub stat_processed: i64,
    pub stat_sent: i64,
    pub stat_failed: i64,
    pub stat_bounces: i64,
    pub cp_list_index: i64,
    pub cp_contact_index: i64,
    pub cp_processed_batches: i64,
    pub cp_has_more: i64,
    pub cp_started_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Brand record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub(crate) struct BrandRow {
    pub id: i64,
    pub name: String,
    pub from_name: String,
    pub from_email: String,
    pub reply_to: Option<String>,
    pub provider_access_key: String,
    pub provider_secret: String,
    pub provider_region: String,
}

/// Contact record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub(crate) struct ContactRow {
    pub id: i64,
    pub list_id: i64,
    pub email: String,
    pub name: Option<String>,
    pub status: i32,
}

/// Convert a unix timestamp to `DateTime<Utc>`
pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

/// Convert a unix-millisecond timestamp to `DateTime<Utc>`
pub(crate) fn from_unix_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Database handle for campaign-dispatch
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
