use super::*;
use crate::test_helpers::{MockTransport, MockTransportFactory};
use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;
use std::time::Duration;
use tempfile::NamedTempFile;
use tower::ServiceExt;

mod campaigns;
mod jobs;

/// Engine over a temp database with no background tasks running
async fn create_test_engine() -> (Arc<DispatchEngine>, NamedTempFile) {
    let temp = NamedTempFile::new().unwrap();
    let mut config = Config::default();
    config.persistence.database_path = temp.path().to_path_buf();
    config.scheduler.enabled = false;

    let engine = DispatchEngine::new(config, MockTransportFactory::new(MockTransport::new(100.0)))
        .await
        .unwrap();
    (Arc::new(engine), temp)
}

fn router_for(engine: &Arc<DispatchEngine>) -> Router {
    create_router(engine.clone(), Arc::new(engine.config().clone()))
}

async fn send(app: Router, method: &str, uri: &str) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_api_server_spawns() {
    let (engine, _temp) = create_test_engine().await;
    let mut config = engine.config().clone();
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();

    let handle = tokio::spawn(start_api_server(engine, Arc::new(config)));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished());
    handle.abort();
}

#[tokio::test]
async fn test_cors_headers() {
    let (engine, _temp) = create_test_engine().await;
    let app = router_for(&engine);

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let (engine, _temp) = create_test_engine().await;
    let mut config = engine.config().clone();
    config.api.cors_enabled = false;
    let app = create_router(engine, Arc::new(config));

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_api_key_required_when_configured() {
    let (engine, _temp) = create_test_engine().await;
    let mut config = engine.config().clone();
    config.api.api_key = Some("operator-key".to_string());
    let app = create_router(engine, Arc::new(config));

    let response = send(app.clone(), "GET", "/health").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/health")
        .header("X-Api-Key", "operator-key")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
