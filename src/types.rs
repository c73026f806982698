//! Core types for campaign-dispatch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

macro_rules! i64_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Get the inner i64 value
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> std::result::Result<Self, sqlx::error::BoxDynError> {
                let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(Self(id))
            }
        }
    };
}

i64_id!(
    /// Unique identifier for a campaign
    CampaignId
);
i64_id!(
    /// Unique identifier for a brand (sender identity + provider account)
    BrandId
);
i64_id!(
    /// Unique identifier for a contact list
    ContactListId
);
i64_id!(
    /// Unique identifier for a contact
    ContactId
);

/// Campaign status
///
/// `draft → queued → sending → {sent | failed | paused}`; `failed` and
/// `paused` campaigns re-enter `sending` with their checkpoint preserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    /// Being authored, not yet scheduled
    Draft,
    /// Handed to the job queue, waiting for a worker
    Queued,
    /// A dispatcher is working through the contact lists
    Sending,
    /// Every list has been exhausted
    Sent,
    /// The last send attempt stopped with an error
    Failed,
    /// Stopped by an operator at a batch boundary
    Paused,
}

impl CampaignStatus {
    /// Convert integer status code to CampaignStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => CampaignStatus::Draft,
            1 => CampaignStatus::Queued,
            2 => CampaignStatus::Sending,
            3 => CampaignStatus::Sent,
            4 => CampaignStatus::Failed,
            5 => CampaignStatus::Paused,
            _ => CampaignStatus::Failed, // Unknown codes are surfaced as failures
        }
    }

    /// Convert CampaignStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            CampaignStatus::Draft => 0,
            CampaignStatus::Queued => 1,
            CampaignStatus::Sending => 2,
            CampaignStatus::Sent => 3,
            CampaignStatus::Failed => 4,
            CampaignStatus::Paused => 5,
        }
    }

    /// Lowercase name as used in API payloads and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Queued => "queued",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Sent => "sent",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Paused => "paused",
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contact status, owned by the delivery-notification consumer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    /// Deliverable
    Active,
    /// Opted out
    Unsubscribed,
    /// Hard bounce reported
    Bounced,
    /// Spam complaint reported
    Complained,
}

impl ContactStatus {
    /// Convert integer status code to ContactStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => ContactStatus::Active,
            1 => ContactStatus::Unsubscribed,
            2 => ContactStatus::Bounced,
            3 => ContactStatus::Complained,
            _ => ContactStatus::Unsubscribed, // Never address an unknown state
        }
    }

    /// Convert ContactStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            ContactStatus::Active => 0,
            ContactStatus::Unsubscribed => 1,
            ContactStatus::Bounced => 2,
            ContactStatus::Complained => 3,
        }
    }

    /// Whether mail may be sent to a contact in this state
    pub fn is_deliverable(&self) -> bool {
        matches!(self, ContactStatus::Active)
    }
}

/// Aggregate send statistics stored on the campaign
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
    /// Contacts attempted
    pub processed: u64,
    /// Contacts the provider accepted
    pub sent: u64,
    /// Delivery failures reported after acceptance (written by the
    /// notification consumer, never by the dispatcher)
    pub failed: u64,
    /// Contacts the provider rejected at send time
    pub bounces: u64,
}

/// Durable resume cursor embedded in the campaign record
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Index into the campaign's ordered contact-list ids
    pub list_index: u64,
    /// Position of the next unprocessed member within that list, counting
    /// members of every status
    pub contact_index: u64,
    /// Batches fully processed during this send
    pub processed_batches: u64,
    /// True while a send is in flight or resumable
    pub has_more_to_process: bool,
    /// When the current send began (not reset on resume)
    pub started_at: Option<DateTime<Utc>>,
}

/// A campaign as stored
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Campaign {
    /// Campaign ID
    pub id: CampaignId,
    /// Owning brand
    pub brand_id: BrandId,
    /// Authoring user
    pub user_id: Option<i64>,
    /// Display name
    pub name: String,
    /// Subject line (may contain `{{name}}` / `{{email}}`)
    pub subject: String,
    /// HTML body
    pub html_body: String,
    /// Plain-text body
    pub text_body: Option<String>,
    /// Sender display name override
    pub from_name: Option<String>,
    /// Sender address override
    pub from_email: Option<String>,
    /// Reply-to override
    pub reply_to: Option<String>,
    /// Target lists, processed in this order
    pub contact_list_ids: Vec<ContactListId>,
    /// Current status
    pub status: CampaignStatus,
    /// When the campaign becomes due (unix seconds)
    pub scheduled_at: Option<i64>,
    /// When the last list was exhausted
    pub sent_at: Option<DateTime<Utc>>,
    /// Last failure reason
    pub error_message: Option<String>,
    /// Aggregate statistics
    pub stats: CampaignStats,
    /// Resume cursor
    pub checkpoint: Checkpoint,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Last-modified timestamp
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a campaign
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewCampaign {
    /// Owning brand
    pub brand_id: BrandId,
    /// Authoring user
    pub user_id: Option<i64>,
    /// Display name
    pub name: String,
    /// Subject line
    pub subject: String,
    /// HTML body
    pub html_body: String,
    /// Plain-text body
    pub text_body: Option<String>,
    /// Sender display name override
    pub from_name: Option<String>,
    /// Sender address override
    pub from_email: Option<String>,
    /// Reply-to override
    pub reply_to: Option<String>,
    /// Target lists
    pub contact_list_ids: Vec<ContactListId>,
    /// Due time (unix seconds)
    pub scheduled_at: Option<i64>,
}

/// A brand: sender defaults and provider account
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Brand {
    /// Brand ID
    pub id: BrandId,
    /// Display name
    pub name: String,
    /// Default sender display name
    pub from_name: String,
    /// Default sender address
    pub from_email: String,
    /// Default reply-to address
    pub reply_to: Option<String>,
    /// Provider credentials as stored (secret possibly encrypted)
    pub credentials: ProviderCredentials,
}

/// A contact as read by the dispatcher
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Contact ID
    pub id: ContactId,
    /// List membership
    pub list_id: ContactListId,
    /// Recipient address
    pub email: String,
    /// Display name
    pub name: Option<String>,
    /// Delivery status
    pub status: ContactStatus,
}

/// Provider account credentials
///
/// The secret may be stored encrypted; it is decrypted at job start.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    /// Access key id
    pub access_key: String,
    /// Secret key (plaintext or `<nonce>:<ciphertext>`)
    pub secret_key: String,
    /// Provider region
    pub region: String,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

/// Payload of a `campaign-send` job
///
/// Carries everything the dispatcher needs so the job runs independently of
/// whatever enqueued it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendJobPayload {
    /// Campaign to send
    pub campaign_id: CampaignId,
    /// Owning brand
    pub brand_id: BrandId,
    /// Requesting user
    #[serde(default)]
    pub user_id: Option<i64>,
    /// Target lists in processing order
    pub contact_list_ids: Vec<ContactListId>,
    /// Resolved sender display name
    pub from_name: String,
    /// Resolved sender address
    pub from_email: String,
    /// Resolved reply-to
    #[serde(default)]
    pub reply_to: Option<String>,
    /// Subject line
    pub subject: String,
    /// Provider credentials as stored
    pub provider_credentials: ProviderCredentials,
}

impl SendJobPayload {
    /// Check required fields before any work starts
    pub fn validate(&self) -> Result<()> {
        if self.contact_list_ids.is_empty() {
            return Err(Error::InvalidPayload(
                "contact_list_ids must not be empty".to_string(),
            ));
        }
        if self.from_email.trim().is_empty() || !self.from_email.contains('@') {
            return Err(Error::InvalidPayload(format!(
                "from_email '{}' is not a usable sender address",
                self.from_email
            )));
        }
        if self.subject.trim().is_empty() {
            return Err(Error::InvalidPayload("subject must not be empty".to_string()));
        }
        if self.provider_credentials.access_key.is_empty()
            || self.provider_credentials.secret_key.is_empty()
        {
            return Err(Error::config(
                "provider credentials are missing",
                "provider_credentials",
            ));
        }
        Ok(())
    }
}

/// Payload of a `campaign-schedule` job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleJobPayload {
    /// Campaign to promote
    pub campaign_id: CampaignId,
}

/// Kind of queued job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    /// Promote a due campaign and enqueue its send
    #[serde(rename = "campaign-schedule")]
    CampaignSchedule,
    /// Run the batch dispatcher for a campaign
    #[serde(rename = "campaign-send")]
    CampaignSend,
}

impl JobKind {
    /// Wire name, also the job-id prefix
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::CampaignSchedule => "campaign-schedule",
            JobKind::CampaignSend => "campaign-send",
        }
    }

    /// Parse a wire name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "campaign-schedule" => Some(JobKind::CampaignSchedule),
            "campaign-send" => Some(JobKind::CampaignSend),
            _ => None,
        }
    }
}

/// Job identifier, derived from job kind and campaign id so re-enqueuing the
/// same campaign collapses onto one job
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Id for a job of `kind` targeting `campaign_id`
    pub fn for_campaign(kind: JobKind, campaign_id: CampaignId) -> Self {
        Self(format!("{}:{}", kind.as_str(), campaign_id))
    }

    /// `campaign-send:<id>`
    pub fn send(campaign_id: CampaignId) -> Self {
        Self::for_campaign(JobKind::CampaignSend, campaign_id)
    }

    /// `campaign-schedule:<id>`
    pub fn schedule(campaign_id: CampaignId) -> Self {
        Self::for_campaign(JobKind::CampaignSchedule, campaign_id)
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Job lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Ready to be claimed
    Waiting,
    /// Claimed by a worker
    Active,
    /// Waiting out a retry backoff
    Delayed,
    /// Finished successfully
    Completed,
    /// Failed permanently or out of attempts
    Dead,
}

impl JobState {
    /// Convert integer state code to JobState
    pub fn from_i32(state: i32) -> Self {
        match state {
            0 => JobState::Waiting,
            1 => JobState::Active,
            2 => JobState::Delayed,
            3 => JobState::Completed,
            _ => JobState::Dead,
        }
    }

    /// Convert JobState to integer state code
    pub fn to_i32(&self) -> i32 {
        match self {
            JobState::Waiting => 0,
            JobState::Active => 1,
            JobState::Delayed => 2,
            JobState::Completed => 3,
            JobState::Dead => 4,
        }
    }

    /// Completed or dead
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }

    /// Lowercase name, as used in the API
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Delayed => "delayed",
            JobState::Completed => "completed",
            JobState::Dead => "dead",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "delayed" => Ok(JobState::Delayed),
            "completed" => Ok(JobState::Completed),
            "dead" => Ok(JobState::Dead),
            other => Err(Error::InvalidPayload(format!("unknown job state '{}'", other))),
        }
    }
}

/// A job as visible to operators
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobInfo {
    /// Job ID
    pub id: JobId,
    /// Job kind
    pub kind: JobKind,
    /// Current state
    pub state: JobState,
    /// Attempts started so far
    pub attempts_made: u32,
    /// Attempt limit
    pub max_attempts: u32,
    /// Last reported progress (0-100)
    pub progress: f32,
    /// Error from the last failed attempt
    pub last_error: Option<String>,
    /// Earliest time the job may run next
    pub run_at: DateTime<Utc>,
    /// Worker holding the lease, if active
    pub locked_by: Option<String>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Finished timestamp
    pub finished_at: Option<DateTime<Utc>>,
}

/// Event emitted by the engine
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Campaign moved to `queued` and its send job was enqueued
    CampaignQueued {
        /// Campaign ID
        campaign_id: CampaignId,
    },

    /// Dispatcher began (or resumed) a campaign
    CampaignStarted {
        /// Campaign ID
        campaign_id: CampaignId,
        /// True when continuing from a checkpoint
        resumed: bool,
        /// Deliverable contacts across all lists at start
        total_contacts: u64,
    },

    /// A batch was committed
    CampaignProgress {
        /// Campaign ID
        campaign_id: CampaignId,
        /// Progress percentage (0.0 to 100.0)
        percent: f32,
        /// Index of the list being processed
        list_index: u64,
        /// Offset within that list
        contact_index: u64,
    },

    /// Estimated recipients exceed the provider's remaining allowance
    QuotaWarning {
        /// Campaign ID
        campaign_id: CampaignId,
        /// Estimated recipients
        required: u64,
        /// Remaining 24-hour allowance
        remaining: u64,
    },

    /// Every list exhausted
    CampaignSent {
        /// Campaign ID
        campaign_id: CampaignId,
        /// Final statistics
        stats: CampaignStats,
    },

    /// Dispatcher stopped at a batch boundary because the campaign was paused
    CampaignPaused {
        /// Campaign ID
        campaign_id: CampaignId,
    },

    /// Send attempt stopped with an error
    CampaignFailed {
        /// Campaign ID
        campaign_id: CampaignId,
        /// Error message
        error: String,
    },

    /// Job progress update
    JobProgress {
        /// Job ID
        job_id: JobId,
        /// Progress percentage (0.0 to 100.0)
        progress: f32,
    },

    /// Job finished successfully
    JobCompleted {
        /// Job ID
        job_id: JobId,
    },

    /// Job failed and was scheduled for another attempt
    JobRetrying {
        /// Job ID
        job_id: JobId,
        /// Attempts made so far
        attempt: u32,
        /// Backoff before the next attempt
        delay_ms: u64,
        /// Error message
        error: String,
    },

    /// Job failed permanently or ran out of attempts
    JobDead {
        /// Job ID
        job_id: JobId,
        /// Error message
        error: String,
    },

    /// Engine shutting down
    Shutdown,
}

impl Event {
    /// Name used as the SSE event type
    pub fn name(&self) -> &'static str {
        match self {
            Event::CampaignQueued { .. } => "campaign_queued",
            Event::CampaignStarted { .. } => "campaign_started",
            Event::CampaignProgress { .. } => "campaign_progress",
            Event::QuotaWarning { .. } => "quota_warning",
            Event::CampaignSent { .. } => "campaign_sent",
            Event::CampaignPaused { .. } => "campaign_paused",
            Event::CampaignFailed { .. } => "campaign_failed",
            Event::JobProgress { .. } => "job_progress",
            Event::JobCompleted { .. } => "job_completed",
            Event::JobRetrying { .. } => "job_retrying",
            Event::JobDead { .. } => "job_dead",
            Event::Shutdown => "shutdown",
        }
    }
}
