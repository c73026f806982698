//! Durable job queue.
//!
//! A job row moves `waiting → active → {completed | delayed | dead}`; `delayed`
//! rows become claimable again once `run_at` passes. Times in this table are
//! unix milliseconds.

use std::time::Duration;

use sqlx::FromRow;

use crate::config::RetryConfig;
use crate::error::DatabaseError;
use crate::retry::backoff_delay;
use crate::types::{JobId, JobInfo, JobKind, JobState};
use crate::{Error, Result};

use super::{Database, from_unix_millis};

/// A job to enqueue
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Deduplication key
    pub id: JobId,
    /// Job kind
    pub kind: JobKind,
    /// JSON payload
    pub payload: String,
    /// Attempts and backoff
    pub retry: RetryConfig,
    /// Wall-clock bound per attempt
    pub timeout: Duration,
    /// Delay before the first attempt
    pub delay: Duration,
}

/// A job leased to a worker
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// Job ID
    pub id: JobId,
    /// Job kind (None if the stored type is unknown to this build)
    pub kind: Option<JobKind>,
    /// Raw stored type name
    pub job_type: String,
    /// JSON payload
    pub payload: String,
    /// Attempt number of this execution (1-based)
    pub attempt: u32,
    /// Attempt limit
    pub max_attempts: u32,
    /// Backoff policy stored with the job
    pub backoff: RetryConfig,
    /// Wall-clock bound for this attempt
    pub timeout: Duration,
}

/// What happened to a job after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Scheduled for another attempt after `delay`
    Retrying {
        /// Attempts made so far
        attempt: u32,
        /// Backoff before the next attempt
        delay: Duration,
    },
    /// Moved to the dead state
    Dead,
    /// The worker no longer held the lease; nothing was changed
    LeaseLost,
}

/// What happened to an enqueue request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Inserted, or a finished job with the same id was reset to `waiting`
    Queued,
    /// A job with the same id is already waiting or delayed; nothing changed
    Pending,
    /// A job with the same id is running; it goes back to `waiting` with the
    /// new payload as soon as the current run completes
    RerunRequested,
}

/// What happened when a worker reported success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCompletion {
    /// The job is finished
    Completed,
    /// A rerun was requested while the job ran; it is `waiting` again
    Requeued,
    /// The worker no longer held the lease; nothing was changed
    LeaseLost,
}

#[derive(Debug, Clone, FromRow)]
struct ClaimedRow {
    id: String,
    job_type: String,
    payload: String,
    attempts_made: i64,
    max_attempts: i64,
    backoff_initial_ms: i64,
    backoff_max_ms: i64,
    backoff_multiplier: f64,
    backoff_jitter: i64,
    timeout_ms: i64,
}

impl From<ClaimedRow> for ClaimedJob {
    fn from(row: ClaimedRow) -> Self {
        ClaimedJob {
            id: JobId(row.id),
            kind: JobKind::parse(&row.job_type),
            job_type: row.job_type,
            payload: row.payload,
            attempt: row.attempts_made.max(0) as u32,
            max_attempts: row.max_attempts.max(1) as u32,
            backoff: RetryConfig {
                max_attempts: row.max_attempts.max(1) as u32,
                initial_delay: Duration::from_millis(row.backoff_initial_ms.max(0) as u64),
                max_delay: Duration::from_millis(row.backoff_max_ms.max(0) as u64),
                backoff_multiplier: row.backoff_multiplier,
                jitter: row.backoff_jitter != 0,
            },
            timeout: Duration::from_millis(row.timeout_ms.max(0) as u64),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct JobInfoRow {
    id: String,
    job_type: String,
    state: i32,
    attempts_made: i64,
    max_attempts: i64,
    progress: f64,
    last_error: Option<String>,
    run_at: i64,
    locked_by: Option<String>,
    created_at: i64,
    finished_at: Option<i64>,
}

impl TryFrom<JobInfoRow> for JobInfo {
    type Error = Error;

    fn try_from(row: JobInfoRow) -> Result<Self> {
        let kind = JobKind::parse(&row.job_type).ok_or_else(|| {
            Error::Other(format!("job {} has unknown type '{}'", row.id, row.job_type))
        })?;

        Ok(JobInfo {
            id: JobId(row.id),
            kind,
            state: JobState::from_i32(row.state),
            attempts_made: row.attempts_made.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            progress: row.progress as f32,
            last_error: row.last_error,
            run_at: from_unix_millis(row.run_at),
            locked_by: row.locked_by,
            created_at: from_unix_millis(row.created_at),
            finished_at: row.finished_at.map(from_unix_millis),
        })
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

/// Which active jobs a recovery pass applies to
#[derive(Debug, Clone, Copy)]
enum RecoveryScope<'a> {
    /// Lease deadline (unix ms) before this instant
    LeaseExpired(i64),
    /// Leased to a worker whose id starts with this prefix
    WorkerPrefix(&'a str),
}

impl<'a> RecoveryScope<'a> {
    fn condition(&self) -> &'static str {
        match self {
            RecoveryScope::LeaseExpired(_) => "locked_until < ?",
            RecoveryScope::WorkerPrefix(_) => "substr(locked_by, 1, length(?)) = ?",
        }
    }

    fn bind<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q>
    where
        'a: 'q,
    {
        match *self {
            RecoveryScope::LeaseExpired(deadline) => query.bind(deadline),
            RecoveryScope::WorkerPrefix(prefix) => query.bind(prefix).bind(prefix),
        }
    }
}

const JOB_INFO_COLUMNS: &str = r#"
    id, job_type, state, attempts_made, max_attempts, progress, last_error,
    run_at, locked_by, created_at, finished_at
"#;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Milliseconds as stored, saturating for durations beyond the column range
fn to_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn query_failed(action: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!(
        "Failed to {}: {}",
        action, e
    )))
}

impl Database {
    /// Enqueue a job, deduplicating on its id
    ///
    /// A waiting or delayed job with the same id absorbs the request. A
    /// completed or dead one is reset and queued again. An active one is
    /// flagged to run once more after it completes, so a request that races
    /// with the end of a run is never lost.
    pub async fn enqueue_job(&self, job: &NewJob) -> Result<Enqueued> {
        let now = now_millis();
        let run_at = now.saturating_add(to_millis(job.delay));

        // The upsert takes the write lock, so the job cannot complete between
        // the two statements
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin enqueue transaction", e))?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, job_type, payload, state, attempts_made, max_attempts,
                backoff_initial_ms, backoff_max_ms, backoff_multiplier, backoff_jitter,
                timeout_ms, run_at, progress, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?, 0.0, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                job_type = excluded.job_type,
                payload = excluded.payload,
                state = excluded.state,
                attempts_made = 0,
                max_attempts = excluded.max_attempts,
                backoff_initial_ms = excluded.backoff_initial_ms,
                backoff_max_ms = excluded.backoff_max_ms,
                backoff_multiplier = excluded.backoff_multiplier,
                backoff_jitter = excluded.backoff_jitter,
                timeout_ms = excluded.timeout_ms,
                run_at = excluded.run_at,
                locked_by = NULL,
                locked_until = NULL,
                progress = 0.0,
                last_error = NULL,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                finished_at = NULL,
                rerun_requested = 0
            WHERE jobs.state IN (?, ?)
            "#,
        )
        .bind(job.id.as_str())
        .bind(job.kind.as_str())
        .bind(&job.payload)
        .bind(JobState::Waiting.to_i32())
        .bind(job.retry.max_attempts.max(1) as i64)
        .bind(to_millis(job.retry.initial_delay))
        .bind(to_millis(job.retry.max_delay))
        .bind(job.retry.backoff_multiplier)
        .bind(job.retry.jitter as i64)
        .bind(to_millis(job.timeout))
        .bind(run_at)
        .bind(now)
        .bind(now)
        .bind(JobState::Completed.to_i32())
        .bind(JobState::Dead.to_i32())
        .execute(&mut *tx)
        .await
        .map_err(|e| query_failed("enqueue job", e))?;

        let outcome = if result.rows_affected() > 0 {
            Enqueued::Queued
        } else {
            let flagged = sqlx::query(
                r#"
                UPDATE jobs SET rerun_requested = 1, payload = ?, updated_at = ?
                WHERE id = ? AND state = ?
                "#,
            )
            .bind(&job.payload)
            .bind(now)
            .bind(job.id.as_str())
            .bind(JobState::Active.to_i32())
            .execute(&mut *tx)
            .await
            .map_err(|e| query_failed("request job rerun", e))?;

            if flagged.rows_affected() > 0 {
                Enqueued::RerunRequested
            } else {
                Enqueued::Pending
            }
        };

        tx.commit()
            .await
            .map_err(|e| query_failed("commit enqueue", e))?;

        Ok(outcome)
    }

    /// Atomically lease the next due job to `worker_id`
    ///
    /// Counts the attempt and sets the lease to the job's timeout plus
    /// `lease_grace`.
    pub async fn claim_next_job(
        &self,
        worker_id: &str,
        lease_grace: Duration,
    ) -> Result<Option<ClaimedJob>> {
        let now = now_millis();

        let row = sqlx::query_as::<_, ClaimedRow>(
            r#"
            UPDATE jobs SET
                state = ?,
                attempts_made = attempts_made + 1,
                locked_by = ?,
                locked_until = ? + timeout_ms + ?,
                updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE state IN (?, ?) AND run_at <= ?
                ORDER BY run_at ASC, created_at ASC
                LIMIT 1
            )
            AND state IN (?, ?)
            RETURNING id, job_type, payload, attempts_made, max_attempts,
                      backoff_initial_ms, backoff_max_ms, backoff_multiplier,
                      backoff_jitter, timeout_ms
            "#,
        )
        .bind(JobState::Active.to_i32())
        .bind(worker_id)
        .bind(now)
        .bind(to_millis(lease_grace))
        .bind(now)
        .bind(JobState::Waiting.to_i32())
        .bind(JobState::Delayed.to_i32())
        .bind(now)
        .bind(JobState::Waiting.to_i32())
        .bind(JobState::Delayed.to_i32())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("claim job", e))?;

        Ok(row.map(ClaimedJob::from))
    }

    /// Mark a leased job completed
    ///
    /// A job flagged for a rerun goes back to `waiting` with a fresh attempt
    /// budget instead.
    pub async fn complete_job(&self, id: &JobId, worker_id: &str) -> Result<JobCompletion> {
        let now = now_millis();
        let state = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE jobs SET
                state = CASE WHEN rerun_requested = 1 THEN ? ELSE ? END,
                attempts_made = CASE WHEN rerun_requested = 1 THEN 0 ELSE attempts_made END,
                run_at = CASE WHEN rerun_requested = 1 THEN ? ELSE run_at END,
                progress = CASE WHEN rerun_requested = 1 THEN 0.0 ELSE 100.0 END,
                finished_at = CASE WHEN rerun_requested = 1 THEN NULL ELSE ? END,
                rerun_requested = 0,
                locked_by = NULL, locked_until = NULL, last_error = NULL, updated_at = ?
            WHERE id = ? AND state = ? AND locked_by = ?
            RETURNING state
            "#,
        )
        .bind(JobState::Waiting.to_i32())
        .bind(JobState::Completed.to_i32())
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(id.as_str())
        .bind(JobState::Active.to_i32())
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("complete job", e))?;

        Ok(match state.map(JobState::from_i32) {
            None => JobCompletion::LeaseLost,
            Some(JobState::Waiting) => JobCompletion::Requeued,
            Some(_) => JobCompletion::Completed,
        })
    }

    /// Record a failed attempt
    ///
    /// Retryable failures with attempts left move to `delayed` with exponential
    /// backoff; anything else moves to `dead`.
    pub async fn fail_job(
        &self,
        job: &ClaimedJob,
        worker_id: &str,
        error: &str,
        retryable: bool,
    ) -> Result<FailureOutcome> {
        let now = now_millis();

        if retryable && job.attempt < job.max_attempts {
            let delay = backoff_delay(&job.backoff, job.attempt);
            let result = sqlx::query(
                r#"
                UPDATE jobs SET
                    state = ?, run_at = ?, locked_by = NULL, locked_until = NULL,
                    last_error = ?, updated_at = ?, rerun_requested = 0
                WHERE id = ? AND state = ? AND locked_by = ?
                "#,
            )
            .bind(JobState::Delayed.to_i32())
            .bind(now.saturating_add(to_millis(delay)))
            .bind(error)
            .bind(now)
            .bind(job.id.as_str())
            .bind(JobState::Active.to_i32())
            .bind(worker_id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("reschedule job", e))?;

            if result.rows_affected() == 0 {
                return Ok(FailureOutcome::LeaseLost);
            }
            return Ok(FailureOutcome::Retrying {
                attempt: job.attempt,
                delay,
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                state = ?, locked_by = NULL, locked_until = NULL,
                last_error = ?, updated_at = ?, finished_at = ?, rerun_requested = 0
            WHERE id = ? AND state = ? AND locked_by = ?
            "#,
        )
        .bind(JobState::Dead.to_i32())
        .bind(error)
        .bind(now)
        .bind(now)
        .bind(job.id.as_str())
        .bind(JobState::Active.to_i32())
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("mark job dead", e))?;

        if result.rows_affected() == 0 {
            return Ok(FailureOutcome::LeaseLost);
        }
        Ok(FailureOutcome::Dead)
    }

    /// Hand a leased job back without consuming its attempt (shutdown)
    pub async fn release_job(&self, id: &JobId, worker_id: &str) -> Result<bool> {
        let now = now_millis();
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                state = ?, attempts_made = MAX(attempts_made - 1, 0),
                locked_by = NULL, locked_until = NULL, run_at = ?, updated_at = ?,
                rerun_requested = 0
            WHERE id = ? AND state = ? AND locked_by = ?
            "#,
        )
        .bind(JobState::Waiting.to_i32())
        .bind(now)
        .bind(now)
        .bind(id.as_str())
        .bind(JobState::Active.to_i32())
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("release job", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Store progress (0-100) for a leased job
    pub async fn update_job_progress(&self, id: &JobId, progress: f32) -> Result<()> {
        sqlx::query("UPDATE jobs SET progress = ?, updated_at = ? WHERE id = ? AND state = ?")
            .bind(f64::from(progress.clamp(0.0, 100.0)))
            .bind(now_millis())
            .bind(id.as_str())
            .bind(JobState::Active.to_i32())
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("update job progress", e))?;

        Ok(())
    }

    /// Recover active jobs whose lease has expired
    ///
    /// Jobs with attempts left go back to `waiting`; the rest move to `dead`.
    /// Returns `(requeued, dead)`.
    pub async fn recover_stalled_jobs(&self) -> Result<(u64, u64)> {
        self.recover_active_jobs(RecoveryScope::LeaseExpired(now_millis()))
            .await
    }

    /// Recover active jobs leased by workers whose id starts with `worker_prefix`
    ///
    /// Used at startup: any job still leased to this node's workers was
    /// orphaned by the previous process.
    pub async fn recover_orphaned_jobs(&self, worker_prefix: &str) -> Result<(u64, u64)> {
        self.recover_active_jobs(RecoveryScope::WorkerPrefix(worker_prefix))
            .await
    }

    async fn recover_active_jobs(&self, scope: RecoveryScope<'_>) -> Result<(u64, u64)> {
        let now = now_millis();
        let condition = scope.condition();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin recovery transaction", e))?;

        let dead_sql = format!(
            r#"
            UPDATE jobs SET
                state = ?, locked_by = NULL, locked_until = NULL,
                last_error = COALESCE(last_error, 'lease expired'),
                updated_at = ?, finished_at = ?, rerun_requested = 0
            WHERE state = ? AND attempts_made >= max_attempts AND {}
            "#,
            condition
        );
        let dead = scope
            .bind(
                sqlx::query(&dead_sql)
                    .bind(JobState::Dead.to_i32())
                    .bind(now)
                    .bind(now)
                    .bind(JobState::Active.to_i32()),
            )
            .execute(&mut *tx)
            .await
            .map_err(|e| query_failed("expire stalled jobs", e))?
            .rows_affected();

        let requeue_sql = format!(
            r#"
            UPDATE jobs SET
                state = ?, locked_by = NULL, locked_until = NULL, run_at = ?, updated_at = ?,
                rerun_requested = 0
            WHERE state = ? AND {}
            "#,
            condition
        );
        let requeued = scope
            .bind(
                sqlx::query(&requeue_sql)
                    .bind(JobState::Waiting.to_i32())
                    .bind(now)
                    .bind(now)
                    .bind(JobState::Active.to_i32()),
            )
            .execute(&mut *tx)
            .await
            .map_err(|e| query_failed("requeue stalled jobs", e))?
            .rows_affected();

        tx.commit()
            .await
            .map_err(|e| query_failed("commit recovery", e))?;

        Ok((requeued, dead))
    }

    /// Get a job by ID
    pub async fn get_job(&self, id: &JobId) -> Result<Option<JobInfo>> {
        let row = sqlx::query_as::<_, JobInfoRow>(&format!(
            "SELECT {} FROM jobs WHERE id = ?",
            JOB_INFO_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("get job", e))?;

        row.map(JobInfo::try_from).transpose()
    }

    /// List jobs, optionally filtered by state, newest first
    pub async fn list_jobs(&self, state: Option<JobState>, limit: u32) -> Result<Vec<JobInfo>> {
        let rows = match state {
            Some(state) => {
                sqlx::query_as::<_, JobInfoRow>(&format!(
                    "SELECT {} FROM jobs WHERE state = ? ORDER BY created_at DESC, id ASC LIMIT ?",
                    JOB_INFO_COLUMNS
                ))
                .bind(state.to_i32())
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, JobInfoRow>(&format!(
                    "SELECT {} FROM jobs ORDER BY created_at DESC, id ASC LIMIT ?",
                    JOB_INFO_COLUMNS
                ))
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| query_failed("list jobs", e))?;

        rows.into_iter().map(JobInfo::try_from).collect()
    }

    /// Put a dead job back in the queue with a fresh attempt budget
    pub async fn retry_dead_job(&self, id: &JobId) -> Result<bool> {
        let now = now_millis();
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                state = ?, attempts_made = 0, run_at = ?, progress = 0.0,
                updated_at = ?, finished_at = NULL
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(JobState::Waiting.to_i32())
        .bind(now)
        .bind(now)
        .bind(id.as_str())
        .bind(JobState::Dead.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("retry dead job", e))?;

        Ok(result.rows_affected() > 0)
    }
}
