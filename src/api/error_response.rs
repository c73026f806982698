//! HTTP error responses
//!
//! Domain errors become a status code from [`ToHttpStatus`] plus an
//! [`ApiError`] JSON body.

use crate::error::{ApiError, Error, ToHttpStatus};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::warn!(error = %self, status = status_code.as_u16(), "API request failed");
        }

        let api_error: ApiError = self.into();
        (status_code, Json(api_error)).into_response()
    }
}

/// Direct `ApiError` responses are 500; request validation uses
/// [`bad_request`]
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

/// 400 with a `validation_error` body
pub fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ApiError::validation(message))).into_response()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CampaignError, DatabaseError};
    use crate::types::{CampaignId, JobId, JobState};

    async fn body_of(response: Response) -> ApiError {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn status_codes_follow_error_kind() {
        let cases: Vec<(Error, u16, &str)> = vec![
            (
                CampaignError::NotFound { id: CampaignId(3) }.into(),
                404,
                "campaign_not_found",
            ),
            (
                Error::InvalidJobState {
                    id: JobId("campaign-send:3".into()),
                    operation: "retry".into(),
                    state: JobState::Active,
                },
                409,
                "invalid_job_state",
            ),
            (Error::ShuttingDown, 503, "shutting_down"),
            (
                Error::Database(DatabaseError::QueryFailed("locked".into())),
                500,
                "database_error",
            ),
        ];

        for (error, status, code) in cases {
            assert_eq!(error.status_code(), status, "{error}");
            assert_eq!(error.error_code(), code);
        }
    }

    #[tokio::test]
    async fn invalid_state_carries_details() {
        let error: Error = CampaignError::InvalidState {
            id: CampaignId(12),
            operation: "pause".into(),
            current_state: "sent".into(),
        }
        .into();
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let api_error = body_of(response).await;
        assert_eq!(api_error.error.code, "invalid_state");
        let details = api_error.error.details.unwrap();
        assert_eq!(details["campaign_id"], 12);
        assert_eq!(details["operation"], "pause");
        assert_eq!(details["current_state"], "sent");
    }

    #[tokio::test]
    async fn bad_request_is_a_validation_error() {
        let response = bad_request("unknown job state 'zombie'");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let api_error = body_of(response).await;
        assert_eq!(api_error.error.code, "validation_error");
        assert!(api_error.error.message.contains("zombie"));
    }
}
