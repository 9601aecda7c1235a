//! Periodic recent sync across all configured providers
//!
//! Every pass runs a recent sync for each provider with `enable_recent_sync`
//! set. Providers run in parallel; runs for the same provider never overlap
//! because the orchestrator serialises them. Releases from each completed run
//! are handed to a [`ReleaseSink`].
//!
//! # Example
//!
//! ```no_run
//! use indexer_sync::scheduler::{ReleaseSink, SyncScheduler};
//! use indexer_sync::{FetchOrchestrator, Provider, Release, ProviderId};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl ReleaseSink for Printer {
//!     async fn deliver(&self, provider: &ProviderId, releases: &[Release]) -> indexer_sync::Result<()> {
//!         for release in releases {
//!             println!("{provider}: {}", release.title);
//!         }
//!         Ok(())
//!     }
//! }
//!
//! # async fn example(orchestrator: Arc<FetchOrchestrator>, providers: Vec<Provider>) {
//! let config = indexer_sync::config::SyncConfig::default();
//! let scheduler = SyncScheduler::new(orchestrator, providers, Arc::new(Printer), &config);
//! let shutdown = scheduler.cancellation_token();
//!
//! let handle = tokio::spawn(scheduler.run());
//! // ...
//! shutdown.cancel();
//! handle.await.ok();
//! # }
//! ```

use crate::config::SyncConfig;
use crate::orchestrator::FetchOrchestrator;
use crate::provider::Provider;
use crate::types::{FetchReport, ProviderId, Release};
use async_trait::async_trait;
use futures::future::join_all;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Largest fraction of the interval added as jitter
const MAX_JITTER_FRACTION: f64 = 0.1;

/// Receives the releases of every completed scheduled run
#[async_trait]
pub trait ReleaseSink: Send + Sync {
    /// Handle one provider's new releases (newest first, never empty)
    async fn deliver(&self, provider: &ProviderId, releases: &[Release]) -> crate::Result<()>;
}

/// Background recent-sync loop
pub struct SyncScheduler {
    orchestrator: Arc<FetchOrchestrator>,
    providers: Vec<Provider>,
    sink: Arc<dyn ReleaseSink>,
    interval: Duration,
    jitter: bool,
    cancel: CancellationToken,
}

impl SyncScheduler {
    /// Create a scheduler over `providers`
    pub fn new(
        orchestrator: Arc<FetchOrchestrator>,
        providers: Vec<Provider>,
        sink: Arc<dyn ReleaseSink>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            orchestrator,
            providers,
            sink,
            interval: config.interval,
            jitter: config.jitter,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops [`run`](Self::run) when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one pass over all providers with recent sync enabled
    ///
    /// Returns the report of every provider that was run.
    pub async fn sync_all(&self) -> Vec<FetchReport> {
        let runs = self
            .providers
            .iter()
            .filter(|provider| {
                let enabled = provider.config.enable_recent_sync;
                if !enabled {
                    debug!(provider = %provider.id(), "recent sync disabled, skipping");
                }
                enabled
            })
            .map(|provider| self.sync_one(provider));

        join_all(runs).await
    }

    async fn sync_one(&self, provider: &Provider) -> FetchReport {
        let report = self.orchestrator.fetch_recent(provider).await;

        // partial results of a failed run are delivered too
        if report.releases.is_empty() {
            return report;
        }

        if let Err(e) = self.sink.deliver(provider.id(), &report.releases).await {
            error!(provider = %provider.id(), error = %e, "failed to deliver releases");
        }

        report
    }

    /// Run passes until the cancellation token fires
    pub async fn run(self) {
        info!(
            providers = self.providers.len(),
            interval_secs = self.interval.as_secs(),
            "sync scheduler started"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let reports = self.sync_all().await;
            let fetched: usize = reports.iter().map(|r| r.releases.len()).sum();
            let failed = reports.iter().filter(|r| !r.is_success()).count();
            debug!(runs = reports.len(), fetched, failed, "sync pass complete");

            let delay = if self.jitter {
                add_jitter(self.interval)
            } else {
                self.interval
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("sync scheduler stopped");
    }
}

/// Stretch `interval` by up to [`MAX_JITTER_FRACTION`]
fn add_jitter(interval: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=MAX_JITTER_FRACTION);
    Duration::from_secs_f64(interval.as_secs_f64() * (1.0 + jitter_factor))
}
