//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`campaigns`] - campaign inspection and control
//! - [`jobs`] - job inspection and retry
//! - [`system`] - health and events

use serde::{Deserialize, Serialize};

mod campaigns;
mod jobs;
mod system;

pub use campaigns::*;
pub use jobs::*;
pub use system::*;

/// Query parameters for GET /jobs
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct JobsQuery {
    /// Filter by state: waiting, active, delayed, completed or dead
    pub state: Option<String>,
    /// Maximum number of jobs to return (default: 100, max: 1000)
    pub limit: Option<u32>,
}

/// Response for actions that enqueue a job
#[derive(Debug, Deserialize, Serialize)]
pub struct JobAccepted {
    /// The enqueued (or already queued) job
    pub job_id: crate::types::JobId,
}
