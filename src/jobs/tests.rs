use super::*;
use crate::config::RetryConfig;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::NamedTempFile;

/// Handler that fails its first `failures` attempts with `error`
struct FlakyHandler {
    failures: u32,
    error: fn() -> Error,
    calls: AtomicU32,
    failure_hooks: AtomicU32,
}

impl FlakyHandler {
    fn new(failures: u32, error: fn() -> Error) -> Arc<Self> {
        Arc::new(Self {
            failures,
            error,
            calls: AtomicU32::new(0),
            failure_hooks: AtomicU32::new(0),
        })
    }
}

#[async_trait::async_trait]
impl JobHandler for FlakyHandler {
    fn kind(&self) -> JobKind {
        JobKind::CampaignSchedule
    }

    async fn handle(&self, _job: &ClaimedJob, ctx: &JobContext) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.report_progress(50.0).await;
        if call <= self.failures {
            return Err((self.error)());
        }
        Ok(())
    }

    async fn on_failure(&self, _job: &ClaimedJob, _error: &Error) {
        self.failure_hooks.fetch_add(1, Ordering::SeqCst);
    }
}

/// Handler that never finishes
struct HangingHandler;

#[async_trait::async_trait]
impl JobHandler for HangingHandler {
    fn kind(&self) -> JobKind {
        JobKind::CampaignSchedule
    }

    async fn handle(&self, _job: &ClaimedJob, _ctx: &JobContext) -> Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Handler that reports shutdown
struct ShutdownHandler;

#[async_trait::async_trait]
impl JobHandler for ShutdownHandler {
    fn kind(&self) -> JobKind {
        JobKind::CampaignSchedule
    }

    async fn handle(&self, _job: &ClaimedJob, _ctx: &JobContext) -> Result<()> {
        Err(Error::ShuttingDown)
    }
}

fn fast_jobs_config() -> JobsConfig {
    JobsConfig {
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 2.0,
            jitter: false,
        },
        timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

struct Harness {
    _temp: NamedTempFile,
    db: Arc<Database>,
    queue: JobQueue,
    runner: JobRunner,
    events: broadcast::Receiver<Event>,
}

async fn harness(config: JobsConfig, handler: Arc<dyn JobHandler>) -> Harness {
    let temp = NamedTempFile::new().unwrap();
    let db = Arc::new(Database::new(temp.path()).await.unwrap());
    let (event_tx, events) = broadcast::channel(100);
    let queue = JobQueue::new(Arc::clone(&db), config.clone());
    let mut runner = JobRunner::new(
        Arc::clone(&db),
        config,
        event_tx,
        CancellationToken::new(),
    );
    runner.register(handler);
    Harness {
        _temp: temp,
        db,
        queue,
        runner,
        events,
    }
}

fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn enqueue_applies_configured_retry_and_deduplicates() {
    let h = harness(fast_jobs_config(), FlakyHandler::new(0, || Error::ShuttingDown)).await;

    assert!(h.queue.enqueue_schedule(CampaignId(5)).await.unwrap());
    assert!(!h.queue.enqueue_schedule(CampaignId(5)).await.unwrap());

    let info = h
        .queue
        .get(&JobId::schedule(CampaignId(5)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.kind, JobKind::CampaignSchedule);
    assert_eq!(info.state, JobState::Waiting);
    assert_eq!(info.max_attempts, 3);
}

#[tokio::test]
async fn successful_job_completes_with_events() {
    let handler = FlakyHandler::new(0, || Error::ShuttingDown);
    let mut h = harness(fast_jobs_config(), handler.clone()).await;
    h.queue.enqueue_schedule(CampaignId(1)).await.unwrap();

    assert!(h.runner.run_next("local-worker-0").await.unwrap());
    assert!(!h.runner.run_next("local-worker-0").await.unwrap());

    let info = h
        .queue
        .get(&JobId::schedule(CampaignId(1)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.state, JobState::Completed);

    let events = drain(&mut h.events);
    assert!(matches!(events[0], Event::JobProgress { progress, .. } if progress == 50.0));
    assert!(matches!(events[1], Event::JobCompleted { .. }));
    assert_eq!(handler.failure_hooks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retryable_failure_is_retried_until_success() {
    let handler = FlakyHandler::new(2, || {
        Error::Provider(crate::error::ProviderError::Unavailable("503".into()))
    });
    let mut h = harness(fast_jobs_config(), handler.clone()).await;
    h.queue.enqueue_schedule(CampaignId(1)).await.unwrap();

    for _ in 0..3 {
        assert!(h.runner.run_next("w").await.unwrap());
    }

    let info = h
        .queue
        .get(&JobId::schedule(CampaignId(1)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.state, JobState::Completed);
    assert_eq!(info.attempts_made, 3);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    assert_eq!(handler.failure_hooks.load(Ordering::SeqCst), 2);

    let retries = drain(&mut h.events)
        .into_iter()
        .filter(|e| matches!(e, Event::JobRetrying { .. }))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn exhausted_retries_move_job_to_dead() {
    let handler = FlakyHandler::new(10, || Error::Timeout(Duration::from_secs(1)));
    let mut h = harness(fast_jobs_config(), handler.clone()).await;
    h.queue.enqueue_schedule(CampaignId(1)).await.unwrap();

    for _ in 0..3 {
        assert!(h.runner.run_next("w").await.unwrap());
    }
    // Nothing left to claim
    assert!(!h.runner.run_next("w").await.unwrap());

    let info = h
        .queue
        .get(&JobId::schedule(CampaignId(1)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.state, JobState::Dead);
    assert!(info.last_error.unwrap().contains("timed out"));

    let events = drain(&mut h.events);
    assert!(matches!(events.last(), Some(Event::JobDead { .. })));
}

#[tokio::test]
async fn permanent_failure_goes_straight_to_dead() {
    let handler = FlakyHandler::new(10, || Error::InvalidPayload("no lists".into()));
    let h = harness(fast_jobs_config(), handler.clone()).await;
    h.queue.enqueue_schedule(CampaignId(1)).await.unwrap();

    assert!(h.runner.run_next("w").await.unwrap());
    assert!(!h.runner.run_next("w").await.unwrap());

    let info = h
        .queue
        .get(&JobId::schedule(CampaignId(1)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.state, JobState::Dead);
    assert_eq!(info.attempts_made, 1);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

    // Operators can put it back
    h.queue
        .retry_dead(&JobId::schedule(CampaignId(1)))
        .await
        .unwrap();
    let err = h
        .queue
        .retry_dead(&JobId::schedule(CampaignId(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidJobState { .. }));
    let err = h.queue.retry_dead(&JobId::from("nope")).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn timeout_counts_as_retryable_failure() {
    let config = JobsConfig {
        timeout: Duration::from_millis(50),
        ..fast_jobs_config()
    };
    let mut h = harness(config, Arc::new(HangingHandler)).await;
    h.queue.enqueue_schedule(CampaignId(1)).await.unwrap();

    assert!(h.runner.run_next("w").await.unwrap());

    let info = h
        .queue
        .get(&JobId::schedule(CampaignId(1)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.state, JobState::Delayed);
    assert!(
        drain(&mut h.events)
            .iter()
            .any(|e| matches!(e, Event::JobRetrying { attempt: 1, .. }))
    );
}

#[tokio::test]
async fn shutdown_releases_job_without_consuming_attempt() {
    let h = harness(fast_jobs_config(), Arc::new(ShutdownHandler)).await;
    h.queue.enqueue_schedule(CampaignId(1)).await.unwrap();

    assert!(h.runner.run_next("w").await.unwrap());

    let info = h
        .queue
        .get(&JobId::schedule(CampaignId(1)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.state, JobState::Waiting);
    assert_eq!(info.attempts_made, 0);
}

#[tokio::test]
async fn unknown_job_type_is_dead() {
    let h = harness(fast_jobs_config(), Arc::new(ShutdownHandler)).await;
    // Only a schedule handler is registered
    h.queue
        .enqueue(
            JobKind::CampaignSend,
            JobId::send(CampaignId(1)),
            &serde_json::json!({}),
            Duration::ZERO,
        )
        .await
        .unwrap();

    assert!(h.runner.run_next("w").await.unwrap());

    let info = h
        .db
        .get_job(&JobId::send(CampaignId(1)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.state, JobState::Dead);
    assert!(info.last_error.unwrap().contains("no handler"));
}

#[tokio::test]
async fn spawned_workers_drain_queue_and_stop_on_cancel() {
    let handler = FlakyHandler::new(0, || Error::ShuttingDown);
    let temp = NamedTempFile::new().unwrap();
    let db = Arc::new(Database::new(temp.path()).await.unwrap());
    let (event_tx, _events) = broadcast::channel(100);
    let cancel = CancellationToken::new();
    let config = fast_jobs_config();
    let queue = JobQueue::new(Arc::clone(&db), config.clone());

    let mut runner = JobRunner::new(Arc::clone(&db), config, event_tx, cancel.clone());
    runner.register(handler.clone());
    assert_eq!(runner.worker_prefix(), "local-worker-");
    let runner = Arc::new(runner);

    for id in 1..=3 {
        queue.enqueue_schedule(CampaignId(id)).await.unwrap();
    }

    let handles = runner.spawn();
    tokio::time::timeout(Duration::from_secs(5), async {
        while db
            .list_jobs(Some(JobState::Completed), 10)
            .await
            .unwrap()
            .len()
            < 3
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("workers should complete all jobs");

    cancel.cancel();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop after cancel")
            .unwrap();
    }
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
}
