//! Mail transmission provider boundary
//!
//! The dispatcher only talks to [`MailTransport`]. Credentials arrive per job,
//! so transports are built on demand by a [`TransportFactory`] rather than
//! held globally.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ProviderError, Result};
use crate::types::ProviderCredentials;

mod http;

pub use http::{HttpMailTransport, HttpTransportFactory};

/// Sending limits reported by the provider
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SendQuota {
    /// Maximum sustained messages per second
    pub max_send_rate: f64,
    /// Messages allowed per rolling 24 hours (negative = unlimited)
    pub max_24_hour_send: f64,
    /// Messages sent in the last 24 hours
    pub sent_last_24_hours: f64,
}

impl SendQuota {
    /// Messages that can still be sent in the current 24-hour window
    pub fn remaining_today(&self) -> u64 {
        if self.max_24_hour_send < 0.0 {
            return u64::MAX;
        }
        (self.max_24_hour_send - self.sent_last_24_hours)
            .max(0.0)
            .floor() as u64
    }
}

/// Provider-assigned message id
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One rendered message for one recipient
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Sender display name
    pub from_name: String,
    /// Sender address
    pub from_email: String,
    /// Recipient address
    pub to: String,
    /// Rendered subject
    pub subject: String,
    /// Rendered HTML body
    pub html_body: String,
    /// Rendered plain-text body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_body: Option<String>,
    /// Reply-to address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl OutgoingMessage {
    /// `"Name <address>"`, or the bare address when there is no name
    pub fn from_header(&self) -> String {
        if self.from_name.trim().is_empty() {
            self.from_email.clone()
        } else {
            format!("{} <{}>", self.from_name, self.from_email)
        }
    }
}

/// Mail transmission provider
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Current rate and daily allowance
    async fn get_send_quota(&self) -> std::result::Result<SendQuota, ProviderError>;

    /// Submit one message
    ///
    /// [`ProviderError::Rejected`] concerns only this recipient; every other
    /// error means the provider itself is unusable right now.
    async fn send(&self, message: &OutgoingMessage) -> std::result::Result<MessageId, ProviderError>;
}

/// Builds a transport for one brand's (already decrypted) credentials
pub trait TransportFactory: Send + Sync {
    /// Create a transport
    fn create(&self, credentials: &ProviderCredentials) -> Result<Arc<dyn MailTransport>>;
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_today_subtracts_sent() {
        let quota = SendQuota {
            max_send_rate: 14.0,
            max_24_hour_send: 50_000.0,
            sent_last_24_hours: 1_234.0,
        };
        assert_eq!(quota.remaining_today(), 48_766);
    }

    #[test]
    fn remaining_today_never_underflows() {
        let quota = SendQuota {
            max_send_rate: 1.0,
            max_24_hour_send: 200.0,
            sent_last_24_hours: 250.0,
        };
        assert_eq!(quota.remaining_today(), 0);
    }

    #[test]
    fn negative_daily_limit_means_unlimited() {
        let quota = SendQuota {
            max_send_rate: 1.0,
            max_24_hour_send: -1.0,
            sent_last_24_hours: 10.0,
        };
        assert_eq!(quota.remaining_today(), u64::MAX);
    }

    #[test]
    fn from_header_includes_display_name() {
        let mut message = OutgoingMessage {
            from_name: "Acme News".into(),
            from_email: "news@acme.test".into(),
            to: "a@b.test".into(),
            subject: "s".into(),
            html_body: "h".into(),
            text_body: None,
            reply_to: None,
        };
        assert_eq!(message.from_header(), "Acme News <news@acme.test>");

        message.from_name.clear();
        assert_eq!(message.from_header(), "news@acme.test");
    }
}
