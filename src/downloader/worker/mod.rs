//! Per-task worker execution.
//!
//! A worker drives exactly one task from `running` to an outcome for this attempt:
//! - [`orchestration`] - pre-start check, engine fetch with progress reporting, and the
//!   post-fetch flag re-check
//! - [`finalization`] - moving staged artifacts into the download directory, thumbnail
//!   population, and reconciling the outcome with the task's flags
//!
//! Every exit path, including panics in the engine, ends in staging cleanup, a terminal
//! store write, deregistration from the active map and an admission pass.

mod finalization;
mod orchestration;


use std::path::PathBuf;

use crate::types::TaskId;

use super::MediaDownloader;
use super::queue::Admitted;

/// How a worker attempt ended
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WorkerOutcome {
    /// Artifacts finalized into the download directory
    Completed {
        /// File or playlist folder in the download directory
        final_path: PathBuf,
        /// Display name of the finished artifact
        filename: String,
        /// Title resolved by the engine
        resolved_title: Option<String>,
    },
    /// The engine (or finalization) failed
    Failed(String),
    /// Pause, abort or delete interrupted the attempt
    Cancelled,
}

impl MediaDownloader {
    /// Spawn the worker for an admitted task
    pub(crate) fn spawn_worker(&self, admitted: Admitted) {
        let downloader = self.clone();
        tokio::spawn(async move {
            downloader.run_worker(admitted).await;
        });
    }

    async fn run_worker(&self, admitted: Admitted) {
        let Admitted { id, token } = admitted;
        tracing::info!(task_id = %id, engine = self.engine.name(), "worker started");

        // The attempt runs in its own task so an engine panic still reaches the exit path
        let attempt = {
            let downloader = self.clone();
            let id = id.clone();
            let token = token.clone();
            tokio::spawn(async move { downloader.execute(&id, &token).await })
        };
        let outcome = match attempt.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(task_id = %id, error = %e, "worker attempt panicked");
                WorkerOutcome::Failed(format!("internal error: {}", e))
            }
        };

        self.staging.cleanup(&id).await;
        self.settle(&id, outcome).await;
        self.deregister(&id);
        self.run_admission_pass().await;
    }

    fn deregister(&self, id: &TaskId) {
        self.queue_state.active().remove(id);
        tracing::debug!(task_id = %id, "worker deregistered");
    }
}
