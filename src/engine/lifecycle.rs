//! Startup recovery and shutdown coordination.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::error::Result;
use crate::scheduler::SchedulePoller;
use crate::types::Event;

use super::DispatchEngine;

/// How long shutdown waits for running jobs to reach a batch boundary
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl DispatchEngine {
    /// Re-queue jobs whose worker is gone
    ///
    /// Jobs still leased to this node's worker names belong to a previous
    /// process and are recovered immediately; other expired leases follow the
    /// normal stalled-job rules.
    pub(crate) async fn recover_jobs(&self) -> Result<()> {
        let prefix = self.runner.worker_prefix();
        let (orphaned, orphaned_dead) = self.db.recover_orphaned_jobs(&prefix).await?;
        let (stalled, stalled_dead) = self.db.recover_stalled_jobs().await?;

        if orphaned + orphaned_dead + stalled + stalled_dead > 0 {
            tracing::warn!(
                orphaned,
                stalled,
                dead = orphaned_dead + stalled_dead,
                "Recovered jobs left active by a previous run"
            );
        }
        Ok(())
    }

    /// Spawn the job workers and, if enabled, the schedule poller
    ///
    /// Calling this more than once has no effect.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut tasks = self.tasks.lock().await;
        tasks.extend(self.runner.spawn());

        if self.config.scheduler.enabled {
            let poller = SchedulePoller::new(
                self.db.clone(),
                self.queue.clone(),
                self.config.scheduler.clone(),
                self.cancel.clone(),
            );
            tasks.push(poller.spawn());
        }

        tracing::info!(
            node = %self.config.jobs.node_name,
            workers = self.config.jobs.workers.max(1),
            scheduler = self.config.scheduler.enabled,
            "Dispatch engine started"
        );
    }

    /// Gracefully shut down the engine
    ///
    /// 1. Stops accepting operator actions
    /// 2. Cancels workers and the poller; a running send stops at its next
    ///    batch boundary and its job is released, not failed
    /// 3. Waits for background tasks with a timeout (30 seconds)
    /// 4. Marks a clean shutdown in the database
    /// 5. Emits [`Event::Shutdown`]
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);
        self.cancel.cancel();

        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        let wait = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "Background task ended abnormally");
                }
            }
        };

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, wait).await {
            Ok(()) => tracing::info!("All background tasks stopped"),
            Err(_) => {
                tracing::warn!("Timeout waiting for background tasks, proceeding with shutdown")
            }
        }

        if let Err(e) = self.db.set_clean_shutdown().await {
            tracing::error!(error = %e, "Failed to mark clean shutdown in database");
        } else {
            tracing::info!("Marked clean shutdown in database");
        }

        let _ = self.event_tx.send(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
