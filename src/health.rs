//! Connectivity health monitoring
//!
//! A [`ConnectivityProbe`] is polled on an interval by the downloader's health service.
//! [`OutageTracker`] turns the probe results into a single trip per outage, so active work
//! is paused once when connectivity drops and never resumed automatically.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{Error, Result};

/// Lightweight reachability check
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// `Ok(())` when the network is reachable
    async fn probe(&self) -> Result<()>;
}

/// Probe that issues a HEAD request and accepts any HTTP response
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    /// Probe `url` with the given per-request timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("media-dl health probe")
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn probe(&self) -> Result<()> {
        // Any status code proves the network path works
        self.client.head(&self.url).send().await?;
        Ok(())
    }
}

/// Counts consecutive probe failures and trips once per outage
#[derive(Debug, Clone)]
pub struct OutageTracker {
    threshold: u32,
    consecutive_failures: u32,
    tripped: bool,
}

impl OutageTracker {
    /// Trip after `threshold` consecutive failures (at least one)
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: 0,
            tripped: false,
        }
    }

    /// Record a probe result; returns `true` exactly when this failure starts an outage
    pub fn record(&mut self, reachable: bool) -> bool {
        if reachable {
            if self.tripped {
                tracing::info!(
                    failures = self.consecutive_failures,
                    "connectivity restored"
                );
            }
            self.consecutive_failures = 0;
            self.tripped = false;
            return false;
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if !self.tripped && self.consecutive_failures >= self.threshold {
            self.tripped = true;
            return true;
        }
        false
    }

    /// Current run of failed probes
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether an outage is in progress
    pub fn is_tripped(&self) -> bool {
        self.tripped
    }
}
