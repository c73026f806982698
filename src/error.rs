//! Error types for campaign-dispatch
//!
//! Errors fall into the classes the job runner cares about:
//! - configuration errors (missing brand, bad credentials, invalid payload) are permanent
//! - provider-level errors (auth failure, throttling, outage) abort the job and are retried
//! - persistence errors are retried in place first, then surfaced to the job runner
//! - per-recipient rejections never leave the batch loop (see [`ProviderError::is_recipient_level`])

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::types::{BrandId, CampaignId, JobId, JobState};

/// Result type alias for campaign-dispatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for campaign-dispatch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key or record field that caused the error
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Campaign lookup or state transition error
    #[error("campaign error: {0}")]
    Campaign(#[from] CampaignError),

    /// Mail transmission provider error
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Brand referenced by a campaign or job does not exist
    #[error("brand {0} not found")]
    BrandNotFound(BrandId),

    /// Job payload failed validation at job start
    #[error("invalid job payload: {0}")]
    InvalidPayload(String),

    /// Credential could not be decrypted
    #[error("secret decryption failed: {0}")]
    Secret(String),

    /// Estimated recipients exceed the provider's remaining daily allowance
    /// and the configured policy is to abort
    #[error("insufficient send quota: {required} recipients, {remaining} remaining today")]
    QuotaInsufficient {
        /// Estimated number of recipients for the send
        required: u64,
        /// Remaining 24-hour allowance reported by the provider
        remaining: u64,
    },

    /// Job exceeded its wall-clock timeout
    #[error("job timed out after {0:?}")]
    Timeout(Duration),

    /// Generic not-found (jobs and other records)
    #[error("not found: {0}")]
    NotFound(String),

    /// Job is not in a state that allows the requested operation
    #[error("cannot {operation} job {id} in state {state}")]
    InvalidJobState {
        /// The job ID
        id: JobId,
        /// The operation that was attempted (e.g., "retry")
        operation: String,
        /// The job's current state
        state: JobState,
    },

    /// Shutdown in progress - work is released, not failed
    #[error("shutdown in progress")]
    ShuttingDown,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Campaign lookup and state-machine errors
#[derive(Debug, Error)]
pub enum CampaignError {
    /// Campaign not found
    #[error("campaign {id} not found")]
    NotFound {
        /// The campaign ID that was not found
        id: CampaignId,
    },

    /// Campaign is in a state that does not allow the requested operation
    #[error("cannot {operation} campaign {id} in state {current_state}")]
    InvalidState {
        /// The campaign ID
        id: CampaignId,
        /// The operation that was attempted (e.g., "send", "pause", "resume")
        operation: String,
        /// The state that prevents the operation
        current_state: String,
    },
}

/// Errors reported by the mail transmission provider
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider refused this particular message (bad address, suppressed
    /// recipient, content rejected). Counted, never fatal to the batch.
    #[error("message to {recipient} rejected: {reason}")]
    Rejected {
        /// Recipient address
        recipient: String,
        /// Provider's reason
        reason: String,
    },

    /// Credentials were refused
    #[error("provider authentication failed: {0}")]
    Unauthorized(String),

    /// Daily or account-level quota exhausted
    #[error("provider quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Provider asked us to slow down
    #[error("provider throttled request: {0}")]
    Throttled(String),

    /// Provider-side outage (5xx)
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Connection, TLS or timeout failure talking to the provider
    #[error("provider transport failure: {0}")]
    Transport(String),

    /// Provider answered with something we could not interpret
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// True if the failure only concerns the single recipient being sent to.
    pub fn is_recipient_level(&self) -> bool {
        matches!(self, ProviderError::Rejected { .. })
    }
}

/// API error response format
///
/// ```json
/// {
///   "error": {
///     "code": "campaign_not_found",
///     "message": "campaign error: campaign 12 not found",
///     "details": { "campaign_id": 12 }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "invalid_state")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,
            Error::InvalidPayload(_) => 422,
            Error::Secret(_) => 422,
            Error::QuotaInsufficient { .. } => 422,

            Error::NotFound(_) => 404,
            Error::BrandNotFound(_) => 404,
            Error::Campaign(CampaignError::NotFound { .. }) => 404,

            Error::Campaign(CampaignError::InvalidState { .. }) => 409,
            Error::InvalidJobState { .. } => 409,

            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            Error::Provider(_) => 502,
            Error::Network(_) => 502,

            Error::ShuttingDown => 503,
            Error::Timeout(_) => 504,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Campaign(CampaignError::NotFound { .. }) => "campaign_not_found",
            Error::Campaign(CampaignError::InvalidState { .. }) => "invalid_state",
            Error::InvalidJobState { .. } => "invalid_job_state",
            Error::Provider(_) => "provider_error",
            Error::BrandNotFound(_) => "brand_not_found",
            Error::InvalidPayload(_) => "invalid_payload",
            Error::Secret(_) => "secret_error",
            Error::QuotaInsufficient { .. } => "quota_insufficient",
            Error::Timeout(_) => "timeout",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Campaign(CampaignError::NotFound { id }) => Some(serde_json::json!({
                "campaign_id": id,
            })),
            Error::Campaign(CampaignError::InvalidState {
                id,
                operation,
                current_state,
            }) => Some(serde_json::json!({
                "campaign_id": id,
                "operation": operation,
                "current_state": current_state,
            })),
            Error::InvalidJobState {
                id,
                operation,
                state,
            } => Some(serde_json::json!({
                "job_id": id,
                "operation": operation,
                "current_state": state,
            })),
            Error::BrandNotFound(id) => Some(serde_json::json!({
                "brand_id": id,
            })),
            Error::QuotaInsufficient {
                required,
                remaining,
            } => Some(serde_json::json!({
                "required": required,
                "remaining": remaining,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
