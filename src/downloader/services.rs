//! Background services: the connectivity health monitor.

use std::sync::Arc;

use crate::health::{ConnectivityProbe, OutageTracker};
use crate::types::Event;

use super::MediaDownloader;

impl MediaDownloader {
    /// Start the connectivity health monitor
    ///
    /// The probe runs every `health.interval`. After `health.failure_threshold`
    /// consecutive failures every active task is paused (once per outage) and
    /// [`Event::ConnectivityLost`] is emitted. Tasks are not resumed automatically.
    ///
    /// Returns `false` when health checks are disabled or the monitor is already running.
    /// The monitor stops on [`MediaDownloader::shutdown`].
    pub fn start_health_monitor(&self) -> bool {
        let probe = match self.services.probe.clone() {
            Some(probe) if self.config.health.enabled => probe,
            _ => {
                tracing::info!("Health checks disabled, skipping health monitor");
                return false;
            }
        };
        if self.services.token.is_cancelled() {
            return false;
        }

        let mut slot = self
            .services
            .health_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::debug!("Health monitor already running");
            return false;
        }

        let downloader = self.clone();
        *slot = Some(tokio::spawn(async move {
            downloader.health_loop(probe).await;
        }));

        tracing::info!(
            interval_secs = self.config.health.interval.as_secs_f64(),
            threshold = self.config.health.failure_threshold,
            "Health monitor started"
        );
        true
    }

    async fn health_loop(&self, probe: Arc<dyn ConnectivityProbe>) {
        let token = self.services.token.clone();
        let mut tracker = OutageTracker::new(self.config.health.failure_threshold);
        let mut ticker = tokio::time::interval(self.config.health.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let reachable = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = probe.probe() => match result {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(error = %e, "connectivity probe failed");
                        false
                    }
                },
            };

            if tracker.record(reachable) {
                let failures = tracker.consecutive_failures();
                tracing::warn!(failures, "connectivity lost, pausing all tasks");
                let paused = self.pause_all().await;
                tracing::info!(paused, "paused tasks after connectivity loss");
                self.emit_event(Event::ConnectivityLost {
                    consecutive_failures: failures,
                });
            }
        }

        tracing::info!("Health monitor stopped");
    }

    /// Cancel and join every background service
    pub(crate) async fn stop_services(&self) {
        self.services.token.cancel();
        let handle = self
            .services
            .health_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "health monitor task failed");
        }
    }
}
