//! The dispatch engine a host process bootstraps.
//!
//! `DispatchEngine` owns every long-lived handle (database, job queue and
//! runner, event channel, cancellation) and passes them explicitly to the
//! components that need them. Its methods are organized by concern:
//! - [`lifecycle`] - startup recovery, `start()` and graceful `shutdown()`
//! - [`control`] - operator actions on campaigns and jobs

mod control;
mod lifecycle;


pub use control::CampaignReport;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::Database;
use crate::dispatcher::{Dispatcher, SendJobHandler};
use crate::error::Result;
use crate::jobs::{JobQueue, JobRunner};
use crate::provider::TransportFactory;
use crate::scheduler::ScheduleJobHandler;
use crate::types::Event;

/// Resumable campaign dispatch engine (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct DispatchEngine {
    /// Database handle, public for hosts that provision campaigns and contacts
    pub db: Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Durable job queue
    pub(crate) queue: JobQueue,
    /// Worker pool executing queued jobs
    pub(crate) runner: Arc<JobRunner>,
    /// Cancelled on shutdown; observed by workers, the poller and the dispatcher
    pub(crate) cancel: CancellationToken,
    /// Spawned background tasks, joined on shutdown
    pub(crate) tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    /// Set once `start()` ran
    pub(crate) started: Arc<AtomicBool>,
    /// Cleared on shutdown; operator actions are refused afterwards
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl DispatchEngine {
    /// Create an engine
    ///
    /// This opens (and migrates) the database, records the start for unclean
    /// shutdown detection, recovers jobs left active by a previous process
    /// and registers the `campaign-send` and `campaign-schedule` handlers.
    /// Nothing runs until [`start`](Self::start).
    pub async fn new(config: Config, transports: Arc<dyn TransportFactory>) -> Result<Self> {
        let db = Arc::new(Database::new(&config.persistence.database_path).await?);

        if db.was_unclean_shutdown().await? {
            tracing::warn!(
                database = %config.persistence.database_path.display(),
                "Previous run did not shut down cleanly, recovering in-flight jobs"
            );
        }
        db.set_clean_start().await?;

        // Buffer of 1000 events per subscriber
        let (event_tx, _rx) = broadcast::channel(1000);
        let config = Arc::new(config);
        let cancel = CancellationToken::new();

        let queue = JobQueue::new(Arc::clone(&db), config.jobs.clone());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&db),
            transports,
            Arc::clone(&config),
            event_tx.clone(),
        ));

        let mut runner = JobRunner::new(
            Arc::clone(&db),
            config.jobs.clone(),
            event_tx.clone(),
            cancel.clone(),
        );
        runner.register(Arc::new(SendJobHandler::new(dispatcher)));
        runner.register(Arc::new(ScheduleJobHandler::new(
            Arc::clone(&db),
            queue.clone(),
            event_tx.clone(),
        )));

        let engine = Self {
            db,
            event_tx,
            config,
            queue,
            runner: Arc::new(runner),
            cancel,
            tasks: Arc::new(Mutex::new(Vec::new())),
            started: Arc::new(AtomicBool::new(false)),
            accepting_new: Arc::new(AtomicBool::new(true)),
        };

        engine.recover_jobs().await?;
        Ok(engine)
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The configuration the engine was created with
    pub fn config(&self) -> &Config {
        &self.config
    }
}
