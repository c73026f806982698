//! # campaign-dispatch
//!
//! Resumable, rate-limited batch email dispatch engine for campaign sends.
//!
//! ## Design Philosophy
//!
//! campaign-dispatch is designed to be:
//! - **Resumable** - A durable checkpoint is committed before every batch, so
//!   a crash, pause or provider outage never skips a contact
//! - **Provider-paced** - Batch size and send rate follow the provider's quota
//! - **Library-first** - The host process owns bootstrap; an optional REST
//!   API exposes operator actions
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use campaign_dispatch::{Config, DispatchEngine, run_with_shutdown};
//! use campaign_dispatch::provider::HttpTransportFactory;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let transports = Arc::new(HttpTransportFactory::new(config.provider.clone()));
//!     let engine = DispatchEngine::new(config, transports).await?;
//!
//!     let mut events = engine.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     engine.start().await;
//!     run_with_shutdown(engine).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Checkpoint commits and progress
pub mod checkpoint;
/// Configuration types
pub mod config;
/// Chunked reads of deliverable contacts
pub mod contact_source;
/// Database persistence layer
pub mod db;
/// Batch dispatcher (the per-campaign send loop)
pub mod dispatcher;
/// Engine bootstrap, lifecycle and operator actions
pub mod engine;
/// Error types
pub mod error;
/// Durable job queue and runner
pub mod jobs;
/// Mail transmission provider
pub mod provider;
/// Batch sizing and quota checks
pub mod quota;
/// Send-rate limiting with a token bucket
pub mod rate_limiter;
/// Retry logic with exponential backoff
pub mod retry;
/// Due-campaign polling and the schedule job
pub mod scheduler;
/// Stored credential decryption
pub mod secrets;
/// Core types and events
pub mod types;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::{Config, QuotaOverrunPolicy, RetryConfig};
pub use db::Database;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use engine::{CampaignReport, DispatchEngine};
pub use error::{
    ApiError, CampaignError, DatabaseError, Error, ErrorDetail, ProviderError, Result,
    ToHttpStatus,
};
pub use jobs::{JobContext, JobHandler, JobQueue, JobRunner};
pub use provider::{MailTransport, OutgoingMessage, SendQuota, TransportFactory};
pub use types::{
    Brand, BrandId, Campaign, CampaignId, CampaignStats, CampaignStatus, Checkpoint, Contact,
    ContactId, ContactListId, ContactStatus, Event, JobId, JobInfo, JobKind, JobState,
    SendJobPayload,
};

/// Run the engine until a termination signal, then shut it down gracefully.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// A send in progress stops at its next batch boundary; the next process
/// resumes it from the checkpoint.
pub async fn run_with_shutdown(engine: DispatchEngine) -> Result<()> {
    wait_for_signal().await;
    engine.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
