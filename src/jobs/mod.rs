//! Job queue and runner.
//!
//! - [`JobQueue`] - typed enqueue over the durable `jobs` table, with the
//!   configured attempts, backoff and timeout applied to every job
//! - [`JobRunner`] - worker loops that claim, execute, retry and recover jobs
//! - [`JobHandler`] - the seam each job kind implements
//!
//! Delivery is at-least-once: a job whose worker dies is re-queued once its
//! lease expires, and handlers must tolerate re-execution.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::JobsConfig;
use crate::db::{ClaimedJob, Database, Enqueued, NewJob};
use crate::error::{Error, Result};
use crate::types::{
    CampaignId, Event, JobId, JobInfo, JobKind, JobState, ScheduleJobPayload, SendJobPayload,
};

mod runner;

pub use runner::JobRunner;

/// Typed access to the durable job queue
#[derive(Clone)]
pub struct JobQueue {
    db: Arc<Database>,
    config: JobsConfig,
}

impl JobQueue {
    /// Create a queue over `db` with the given job defaults
    pub fn new(db: Arc<Database>, config: JobsConfig) -> Self {
        Self { db, config }
    }

    /// Enqueue a job under `id`
    ///
    /// Returns true when this request leads to a run: a new job, a finished
    /// one reset, or a rerun of one that is running now. Returns false when a
    /// job with that id is already waiting.
    pub async fn enqueue<P: Serialize>(
        &self,
        kind: JobKind,
        id: JobId,
        payload: &P,
        delay: Duration,
    ) -> Result<bool> {
        let job = NewJob {
            id,
            kind,
            payload: serde_json::to_string(payload)?,
            retry: self.config.retry.clone(),
            timeout: self.config.timeout,
            delay,
        };

        match self.db.enqueue_job(&job).await? {
            Enqueued::Queued => {
                tracing::debug!(job_id = %job.id, kind = kind.as_str(), "Job enqueued");
                Ok(true)
            }
            Enqueued::RerunRequested => {
                tracing::info!(job_id = %job.id, "Job is running, rerun requested");
                Ok(true)
            }
            Enqueued::Pending => {
                tracing::debug!(job_id = %job.id, "Job already queued, not enqueuing again");
                Ok(false)
            }
        }
    }

    /// Enqueue the send job for a campaign
    pub async fn enqueue_send(&self, payload: &SendJobPayload) -> Result<bool> {
        self.enqueue(
            JobKind::CampaignSend,
            JobId::send(payload.campaign_id),
            payload,
            Duration::ZERO,
        )
        .await
    }

    /// Enqueue the schedule job for a campaign
    pub async fn enqueue_schedule(&self, campaign_id: CampaignId) -> Result<bool> {
        self.enqueue(
            JobKind::CampaignSchedule,
            JobId::schedule(campaign_id),
            &ScheduleJobPayload { campaign_id },
            Duration::ZERO,
        )
        .await
    }

    /// Get a job by ID
    pub async fn get(&self, id: &JobId) -> Result<Option<JobInfo>> {
        self.db.get_job(id).await
    }

    /// List jobs, optionally filtered by state
    pub async fn list(&self, state: Option<JobState>, limit: u32) -> Result<Vec<JobInfo>> {
        self.db.list_jobs(state, limit).await
    }

    /// Re-queue a dead job with a fresh attempt budget
    pub async fn retry_dead(&self, id: &JobId) -> Result<()> {
        let job = self
            .db
            .get_job(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;

        if job.state != JobState::Dead {
            return Err(Error::InvalidJobState {
                id: id.clone(),
                operation: "retry".to_string(),
                state: job.state,
            });
        }

        if self.db.retry_dead_job(id).await? {
            tracing::info!(job_id = %id, "Dead job re-queued");
        }
        Ok(())
    }
}

/// Execution context handed to a [`JobHandler`]
pub struct JobContext {
    job_id: JobId,
    attempt: u32,
    db: Arc<Database>,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(
        job_id: JobId,
        attempt: u32,
        db: Arc<Database>,
        event_tx: broadcast::Sender<Event>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            attempt,
            db,
            event_tx,
            cancel,
        }
    }

    /// ID of the running job
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Attempt number of this execution (1-based)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// True once shutdown was requested; handlers stop at the next safe point
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record progress (0-100) and emit a `JobProgress` event
    ///
    /// Progress is informational; a failed write is logged, not returned.
    pub async fn report_progress(&self, progress: f32) {
        if let Err(e) = self.db.update_job_progress(&self.job_id, progress).await {
            tracing::warn!(job_id = %self.job_id, error = %e, "Failed to store job progress");
        }
        let _ = self.event_tx.send(Event::JobProgress {
            job_id: self.job_id.clone(),
            progress,
        });
    }
}

/// Executes jobs of one kind
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    /// Kind of job this handler executes
    fn kind(&self) -> JobKind;

    /// Run one attempt of `job`
    ///
    /// Return [`Error::ShuttingDown`] to hand the job back without consuming
    /// the attempt.
    async fn handle(&self, job: &ClaimedJob, ctx: &JobContext) -> Result<()>;

    /// Called after an attempt failed or timed out
    async fn on_failure(&self, _job: &ClaimedJob, _error: &Error) {}
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
