//! Shutdown coordination.

use std::sync::atomic::Ordering;

use crate::error::Result;
use crate::types::{Event, Status};

use super::MediaDownloader;

impl MediaDownloader {
    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new tasks and suppresses admission
    /// 2. Force-pauses every active task in one store transaction
    /// 3. Cancels every worker and waits (up to `download.shutdown_timeout`) for them to exit
    /// 4. Stops background services
    /// 5. Persists the final state
    ///
    /// Paused tasks resume as `paused` on the next start; the user decides when to continue.
    ///
    /// # Errors
    ///
    /// Returns an error if the final persist fails. The rest of the sequence still runs.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new work
        self.queue_state
            .accepting_new
            .store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new tasks");

        // 2. Force-pause everything that is queued or running
        let paused = self.pause_for_shutdown().await;
        tracing::info!(paused, "Force-paused active tasks");

        // 3. Signal every worker and wait for them to exit
        let ids: Vec<_> = {
            let active = self.queue_state.active();
            for token in active.values() {
                token.cancel();
            }
            active.keys().cloned().collect()
        };
        if !ids.is_empty()
            && !self
                .wait_for_workers(&ids, self.config.download.shutdown_timeout)
                .await
        {
            tracing::warn!("Timeout waiting for workers to exit, proceeding with shutdown");
        } else {
            tracing::info!("All workers stopped");
        }

        // 4. Stop background services
        self.stop_services().await;

        // 5. Persist final state
        let persisted = self.store.persist().await;
        match &persisted {
            Ok(()) => tracing::info!("Final state persisted"),
            Err(e) => tracing::error!(error = %e, "Failed to persist final state during shutdown"),
        }

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        persisted
    }

    /// Mark every queued or running task as paused
    async fn pause_for_shutdown(&self) -> usize {
        self.store
            .transaction(|tx| {
                let mut count = 0;
                for task in tx.tasks_mut() {
                    if task.status.is_active() {
                        task.paused = true;
                        task.status = Status::Paused;
                        task.progress = "Paused".to_string();
                        count += 1;
                    }
                }
                count
            })
            .await
    }
}
