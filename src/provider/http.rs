//! HTTP mail transmission provider

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

use super::{MailTransport, MessageId, OutgoingMessage, SendQuota, TransportFactory};
use crate::config::ProviderConfig;
use crate::error::{Error, ProviderError, Result};
use crate::types::ProviderCredentials;

/// Provider reached over a JSON HTTP API
///
/// - `GET {endpoint}/quota` returns a [`SendQuota`]
/// - `POST {endpoint}/send` accepts one message and returns `{"message_id": ...}`
///
/// Requests carry `Authorization: Bearer <secret key>`, `X-Access-Key` and
/// `X-Region` headers.
#[derive(Clone)]
pub struct HttpMailTransport {
    client: reqwest::Client,
    base: String,
    credentials: ProviderCredentials,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: String,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

#[derive(Deserialize)]
struct SendResponse {
    message_id: String,
}

impl HttpMailTransport {
    /// Create a transport for one set of decrypted credentials
    pub fn new(config: &ProviderConfig, credentials: ProviderCredentials) -> Result<Self> {
        let parsed = Url::parse(&config.endpoint).map_err(|e| {
            Error::config(
                format!("invalid provider endpoint '{}': {}", config.endpoint, e),
                "provider.endpoint",
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base: parsed.as_str().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base, path))
            .bearer_auth(&self.credentials.secret_key)
            .header("X-Access-Key", &self.credentials.access_key)
            .header("X-Region", &self.credentials.region)
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_decode() {
        ProviderError::InvalidResponse(e.to_string())
    } else {
        ProviderError::Transport(e.to_string())
    }
}

/// Map a non-success status on `/send` to a provider error
fn send_status_error(status: StatusCode, body: String, recipient: &str) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::Unauthorized(body),
        429 if body.to_ascii_lowercase().contains("quota") => ProviderError::QuotaExceeded(body),
        429 => ProviderError::Throttled(body),
        400..=499 => ProviderError::Rejected {
            recipient: recipient.to_string(),
            reason: if body.is_empty() {
                status.to_string()
            } else {
                body
            },
        },
        500..=599 => ProviderError::Unavailable(format!("{}: {}", status, body)),
        _ => ProviderError::InvalidResponse(format!("unexpected status {}", status)),
    }
}

/// Map a non-success status on `/quota` to a provider error
fn quota_status_error(status: StatusCode, body: String) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::Unauthorized(body),
        429 => ProviderError::Throttled(body),
        500..=599 => ProviderError::Unavailable(format!("{}: {}", status, body)),
        _ => ProviderError::InvalidResponse(format!("quota request returned {}: {}", status, body)),
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    async fn get_send_quota(&self) -> std::result::Result<SendQuota, ProviderError> {
        let response = self
            .request(reqwest::Method::GET, "quota")
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(quota_status_error(status, body));
        }

        response.json::<SendQuota>().await.map_err(transport_error)
    }

    async fn send(&self, message: &OutgoingMessage) -> std::result::Result<MessageId, ProviderError> {
        let body = SendRequest {
            from: message.from_header(),
            to: &message.to,
            subject: &message.subject,
            html: &message.html_body,
            text: message.text_body.as_deref(),
            reply_to: message.reply_to.as_deref(),
        };

        let response = self
            .request(reqwest::Method::POST, "send")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(send_status_error(status, body, &message.to));
        }

        let parsed: SendResponse = response.json().await.map_err(transport_error)?;
        Ok(MessageId(parsed.message_id))
    }
}

/// Builds [`HttpMailTransport`]s sharing one provider configuration
#[derive(Clone, Debug, Default)]
pub struct HttpTransportFactory {
    config: ProviderConfig,
}

impl HttpTransportFactory {
    /// Create a factory for the configured endpoint
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for HttpTransportFactory {
    fn create(&self, credentials: &ProviderCredentials) -> Result<Arc<dyn MailTransport>> {
        Ok(Arc::new(HttpMailTransport::new(
            &self.config,
            credentials.clone(),
        )?))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> ProviderCredentials {
        ProviderCredentials {
            access_key: "AKIATEST".into(),
            secret_key: "shh".into(),
            region: "eu-west-1".into(),
        }
    }

    fn transport(server: &MockServer) -> HttpMailTransport {
        let config = ProviderConfig {
            endpoint: format!("{}/v1/", server.uri()),
            request_timeout: Duration::from_secs(5),
        };
        HttpMailTransport::new(&config, credentials()).unwrap()
    }

    fn message() -> OutgoingMessage {
        OutgoingMessage {
            from_name: "Acme".into(),
            from_email: "news@acme.test".into(),
            to: "reader@example.com".into(),
            subject: "Hello".into(),
            html_body: "<p>Hi</p>".into(),
            text_body: Some("Hi".into()),
            reply_to: None,
        }
    }

    #[tokio::test]
    async fn quota_is_parsed_and_authenticated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/quota"))
            .and(header("authorization", "Bearer shh"))
            .and(header("x-access-key", "AKIATEST"))
            .and(header("x-region", "eu-west-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "max_send_rate": 14.0,
                "max_24_hour_send": 50000.0,
                "sent_last_24_hours": 120.0
            })))
            .mount(&server)
            .await;

        let quota = transport(&server).get_send_quota().await.unwrap();
        assert_eq!(quota.max_send_rate, 14.0);
        assert_eq!(quota.remaining_today(), 49_880);
    }

    #[tokio::test]
    async fn send_returns_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/send"))
            .and(body_partial_json(serde_json::json!({
                "from": "Acme <news@acme.test>",
                "to": "reader@example.com",
                "subject": "Hello",
                "text": "Hi"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "message_id": "msg-001" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let id = transport(&server).send(&message()).await.unwrap();
        assert_eq!(id, MessageId("msg-001".into()));
    }

    #[tokio::test]
    async fn bad_request_is_a_recipient_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/send"))
            .respond_with(ResponseTemplate::new(400).set_body_string("address is suppressed"))
            .mount(&server)
            .await;

        let err = transport(&server).send(&message()).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::Rejected {
                recipient: "reader@example.com".into(),
                reason: "address is suppressed".into(),
            }
        );
        assert!(err.is_recipient_level());
    }

    #[tokio::test]
    async fn provider_level_statuses_are_not_recipient_level() {
        let cases = [
            (401, "bad signature"),
            (403, "account suspended"),
            (429, "slow down"),
            (429, "daily quota exhausted"),
            (503, "maintenance"),
        ];

        for (status, body) in cases {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/v1/send"))
                .respond_with(ResponseTemplate::new(status).set_body_string(body))
                .mount(&server)
                .await;

            let err = transport(&server).send(&message()).await.unwrap_err();
            assert!(!err.is_recipient_level(), "{status} mapped to {err:?}");
        }
    }

    #[test]
    fn status_mapping_table() {
        let to = "x@example.com";
        assert!(matches!(
            send_status_error(StatusCode::UNPROCESSABLE_ENTITY, "bad".into(), to),
            ProviderError::Rejected { .. }
        ));
        assert!(matches!(
            send_status_error(StatusCode::UNAUTHORIZED, String::new(), to),
            ProviderError::Unauthorized(_)
        ));
        assert!(matches!(
            send_status_error(StatusCode::TOO_MANY_REQUESTS, "Quota exceeded".into(), to),
            ProviderError::QuotaExceeded(_)
        ));
        assert!(matches!(
            send_status_error(StatusCode::TOO_MANY_REQUESTS, "rate".into(), to),
            ProviderError::Throttled(_)
        ));
        assert!(matches!(
            send_status_error(StatusCode::BAD_GATEWAY, String::new(), to),
            ProviderError::Unavailable(_)
        ));
        assert!(matches!(
            quota_status_error(StatusCode::NOT_FOUND, String::new()),
            ProviderError::InvalidResponse(_)
        ));
    }

    #[tokio::test]
    async fn unreachable_provider_is_a_transport_error() {
        let config = ProviderConfig {
            // Port 9 (discard) is not listening in test environments
            endpoint: "http://127.0.0.1:9/v1".into(),
            request_timeout: Duration::from_secs(2),
        };
        let transport = HttpMailTransport::new(&config, credentials()).unwrap();

        let err = transport.get_send_quota().await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)), "{err:?}");
    }

    #[test]
    fn invalid_endpoint_is_a_config_error() {
        let config = ProviderConfig {
            endpoint: "not a url".into(),
            request_timeout: Duration::from_secs(1),
        };
        let err = HttpMailTransport::new(&config, credentials()).err().unwrap();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn factory_builds_transports() {
        let factory = HttpTransportFactory::new(ProviderConfig::default());
        assert!(factory.create(&credentials()).is_ok());
    }
}
