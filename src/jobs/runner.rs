//! Worker loops: claim, execute, retry, recover.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::JobsConfig;
use crate::db::{ClaimedJob, Database, FailureOutcome, JobCompletion};
use crate::error::{Error, Result};
use crate::retry::IsRetryable;
use crate::types::{Event, JobKind};

use super::{JobContext, JobHandler};

/// Runs registered [`JobHandler`]s against the durable queue
pub struct JobRunner {
    db: Arc<Database>,
    config: JobsConfig,
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl JobRunner {
    /// Create a runner with no handlers
    pub fn new(
        db: Arc<Database>,
        config: JobsConfig,
        event_tx: broadcast::Sender<Event>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            db,
            config,
            handlers: HashMap::new(),
            event_tx,
            cancel,
        }
    }

    /// Register the handler for its job kind, replacing any previous one
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    /// Prefix shared by every worker id of this node
    pub fn worker_prefix(&self) -> String {
        format!("{}-worker-", self.config.node_name)
    }

    /// Spawn the configured number of workers plus the stalled-job sweeper
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.config.workers + 1);

        for index in 0..self.config.workers.max(1) {
            let runner = Arc::clone(self);
            let worker_id = format!("{}{}", self.worker_prefix(), index);
            handles.push(tokio::spawn(async move {
                runner.worker_loop(worker_id).await;
            }));
        }

        let runner = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            runner.stalled_job_loop().await;
        }));

        handles
    }

    async fn worker_loop(self: Arc<Self>, worker_id: String) {
        tracing::debug!(worker_id = %worker_id, "Job worker started");

        while !self.cancel.is_cancelled() {
            let ran = match self.run_next(&worker_id).await {
                Ok(ran) => ran,
                Err(e) => {
                    tracing::warn!(worker_id = %worker_id, error = %e, "Job worker iteration failed");
                    false
                }
            };

            if !ran {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        tracing::debug!(worker_id = %worker_id, "Job worker stopped");
    }

    async fn stalled_job_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.stalled_check_interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.db.recover_stalled_jobs().await {
                        Ok((0, 0)) => {}
                        Ok((requeued, dead)) => {
                            tracing::warn!(requeued, dead, "Recovered stalled jobs with expired leases");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to sweep stalled jobs");
                        }
                    }
                }
            }
        }
    }

    /// Claim and execute one due job as `worker_id`
    ///
    /// Returns false when nothing was claimable.
    pub async fn run_next(&self, worker_id: &str) -> Result<bool> {
        let Some(job) = self
            .db
            .claim_next_job(worker_id, self.config.lease_grace)
            .await?
        else {
            return Ok(false);
        };

        self.execute(job, worker_id).await?;
        Ok(true)
    }

    async fn execute(&self, job: ClaimedJob, worker_id: &str) -> Result<()> {
        let Some(handler) = job.kind.and_then(|kind| self.handlers.get(&kind)).cloned() else {
            let error = format!("no handler registered for job type '{}'", job.job_type);
            tracing::error!(job_id = %job.id, "{}", error);
            self.db.fail_job(&job, worker_id, &error, false).await?;
            let _ = self.event_tx.send(Event::JobDead {
                job_id: job.id.clone(),
                error,
            });
            return Ok(());
        };

        tracing::info!(
            job_id = %job.id,
            worker_id,
            attempt = job.attempt,
            max_attempts = job.max_attempts,
            "Job claimed"
        );

        let ctx = JobContext::new(
            job.id.clone(),
            job.attempt,
            Arc::clone(&self.db),
            self.event_tx.clone(),
            self.cancel.child_token(),
        );

        let result = match tokio::time::timeout(job.timeout, handler.handle(&job, &ctx)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(job.timeout)),
        };

        match result {
            Ok(()) => {
                match self.db.complete_job(&job.id, worker_id).await? {
                    JobCompletion::Completed => {
                        tracing::info!(job_id = %job.id, attempt = job.attempt, "Job completed");
                        let _ = self.event_tx.send(Event::JobCompleted {
                            job_id: job.id.clone(),
                        });
                    }
                    JobCompletion::Requeued => {
                        tracing::info!(
                            job_id = %job.id,
                            attempt = job.attempt,
                            "Job finished with a rerun requested, queued again"
                        );
                    }
                    JobCompletion::LeaseLost => {
                        tracing::warn!(job_id = %job.id, "Job finished after its lease was lost");
                    }
                }
            }
            Err(Error::ShuttingDown) => {
                self.db.release_job(&job.id, worker_id).await?;
                tracing::info!(job_id = %job.id, "Job released for shutdown");
            }
            Err(e) => {
                handler.on_failure(&job, &e).await;
                self.record_failure(&job, worker_id, &e).await?;
            }
        }

        Ok(())
    }

    async fn record_failure(&self, job: &ClaimedJob, worker_id: &str, error: &Error) -> Result<()> {
        let message = error.to_string();
        let outcome = self
            .db
            .fail_job(job, worker_id, &message, error.is_retryable())
            .await?;

        match outcome {
            FailureOutcome::Retrying { attempt, delay } => {
                tracing::warn!(
                    job_id = %job.id,
                    attempt,
                    max_attempts = job.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Job failed, retry scheduled"
                );
                let _ = self.event_tx.send(Event::JobRetrying {
                    job_id: job.id.clone(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    error: message,
                });
            }
            FailureOutcome::Dead => {
                tracing::error!(
                    job_id = %job.id,
                    attempts = job.attempt,
                    error = %error,
                    "Job moved to dead state"
                );
                let _ = self.event_tx.send(Event::JobDead {
                    job_id: job.id.clone(),
                    error: message,
                });
            }
            FailureOutcome::LeaseLost => {
                tracing::warn!(
                    job_id = %job.id,
                    error = %error,
                    "Job failed after its lease was lost"
                );
            }
        }

        Ok(())
    }
}
