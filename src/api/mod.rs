//! REST API server module
//!
//! Operator surface over a running [`DispatchEngine`]: campaign inspection
//! and control, job inspection and retry, health and a server-sent event
//! stream.

use crate::{Config, DispatchEngine, Result};
use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod error_response;
pub mod routes;
pub mod state;

pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Campaigns
/// - `GET /campaigns/:id` - Status, stats, checkpoint and progress
/// - `POST /campaigns/:id/send` - Queue the campaign for sending now
/// - `POST /campaigns/:id/pause` - Pause at the next batch boundary
/// - `POST /campaigns/:id/resume` - Resume a paused or failed campaign
///
/// ## Jobs
/// - `GET /jobs` - List jobs (`?state=dead&limit=50`)
/// - `GET /jobs/:id` - Get single job
/// - `POST /jobs/:id/retry` - Retry a dead job
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /events` - Server-sent events stream
pub fn create_router(engine: Arc<DispatchEngine>, config: Arc<Config>) -> Router {
    let state = AppState::new(engine, config.clone());

    let router = Router::new()
        // Campaigns
        .route("/campaigns/:id", get(routes::get_campaign))
        .route("/campaigns/:id/send", post(routes::send_campaign))
        .route("/campaigns/:id/pause", post(routes::pause_campaign))
        .route("/campaigns/:id/resume", post(routes::resume_campaign))
        // Jobs
        .route("/jobs", get(routes::list_jobs))
        .route("/jobs/:id", get(routes::get_job))
        .route("/jobs/:id/retry", post(routes::retry_job))
        // System
        .route("/health", get(routes::health_check))
        .route("/events", get(routes::event_stream))
        .with_state(state);

    // Apply authentication middleware if API key is configured
    let router = if config.api.api_key.is_some() {
        router.layer(middleware::from_fn_with_state(
            config.api.api_key.clone(),
            auth::require_api_key,
        ))
    } else {
        router
    };

    let router = router.layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        router.layer(build_cors_layer(&config.api.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins ("*" allows any)
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Runs until the server stops or fails.
///
/// # Example
///
/// ```no_run
/// use campaign_dispatch::{Config, DispatchEngine};
/// use campaign_dispatch::provider::HttpTransportFactory;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Arc::new(Config::default());
/// let transports = Arc::new(HttpTransportFactory::new(config.provider.clone()));
/// let engine = Arc::new(DispatchEngine::new((*config).clone(), transports).await?);
/// engine.start().await;
///
/// campaign_dispatch::api::start_api_server(engine, config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(engine: Arc<DispatchEngine>, config: Arc<Config>) -> Result<()> {
    let bind_address = config.api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(engine, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
