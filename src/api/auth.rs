//! Optional API key authentication
//!
//! When `ApiConfig::api_key` is set, every request must carry a matching
//! `X-Api-Key` header; anything else gets a 401 with the usual error body.

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;

/// Reject requests whose `X-Api-Key` header does not match `expected_api_key`
///
/// A `None` key lets every request through.
pub async fn require_api_key(
    State(expected_api_key): State<Option<String>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected_key) = expected_api_key else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());

    match provided {
        Some(key) if constant_time_eq(key.as_bytes(), expected_key.as_bytes()) => {
            next.run(request).await
        }
        Some(_) => unauthorized_response("Invalid API key"),
        None => unauthorized_response("Missing X-Api-Key header"),
    }
}

/// Compares every byte regardless of where the first mismatch is
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiError::new("unauthorized", message)),
    )
        .into_response()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, middleware, routing::get};
    use tower::ServiceExt; // for oneshot

    fn app(api_key: Option<&str>) -> Router {
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(middleware::from_fn_with_state(
                api_key.map(str::to_string),
                require_api_key,
            ))
    }

    async fn call(app: Router, key: Option<&str>) -> (StatusCode, String) {
        let mut request = Request::builder().uri("/ping");
        if let Some(key) = key {
            request = request.header("x-api-key", key);
        }
        let response = app
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn open_when_no_key_configured() {
        assert_eq!(call(app(None), None).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn matching_key_passes() {
        let (status, body) = call(app(Some("operator-key")), Some("operator-key")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "pong");
    }

    #[tokio::test]
    async fn wrong_or_missing_key_is_rejected() {
        let (status, body) = call(app(Some("operator-key")), Some("Operator-Key")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("Invalid API key"));
        assert!(body.contains("\"code\":\"unauthorized\""));

        let (status, body) = call(app(Some("operator-key")), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("Missing X-Api-Key header"));

        // No trimming
        let (status, _) = call(app(Some("key ")), Some("key")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
