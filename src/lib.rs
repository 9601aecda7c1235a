//! # indexer-sync
//!
//! Paginated release fetching and incremental sync for Usenet and torrent
//! indexers (Newznab, Torznab, plain RSS/Atom feeds).
//!
//! ## Design Philosophy
//!
//! indexer-sync is designed to be:
//! - **Provider-agnostic** - Each indexer plugs in a request generator and a response parser
//! - **Gap-aware** - Recent syncs page back until the previous sync point and report what they missed
//! - **Polite** - Per-provider request spacing, Retry-After honouring and escalating backoff
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use indexer_sync::{
//!     Config, Database, FeedParser, FetchOrchestrator, OffsetPaging, PageableRequestSequence,
//!     Provider, ProviderConfig, RequestChain, RequestGenerator, ReqwestExecutor, SearchCriteria,
//! };
//! use std::sync::Arc;
//! use url::Url;
//!
//! struct Newznab {
//!     api: Url,
//! }
//!
//! impl RequestGenerator for Newznab {
//!     fn recent_requests(&self) -> RequestChain {
//!         let mut chain = RequestChain::new();
//!         chain.add(OffsetPaging::new(self.api.clone(), 100, 10).into_sequence());
//!         chain
//!     }
//!
//!     fn search_requests(&self, _criteria: &SearchCriteria) -> RequestChain {
//!         RequestChain::new()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let store = Arc::new(Database::new(&config.persistence.database_path).await?);
//!     let executor = Arc::new(ReqwestExecutor::new(&config.http)?);
//!     let orchestrator = FetchOrchestrator::new(&config, executor, store);
//!
//!     let api = Url::parse("https://indexer.example/api?t=search&apikey=KEY")?;
//!     let provider = Provider::new(
//!         ProviderConfig::new("example", api.as_str()),
//!         Arc::new(Newznab { api }),
//!         Arc::new(FeedParser),
//!     );
//!
//!     // Subscribe to events
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = orchestrator.fetch_recent(&provider).await;
//!     println!("{} new releases", report.releases.len());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Page fetching, rate limiting and response classification
pub mod fetcher;
/// Run orchestration across tiers and pages
pub mod orchestrator;
/// RSS/Atom/Newznab/Torznab feed parsing
pub mod parser;
/// Provider definition
pub mod provider;
/// Request chains and pagination
pub mod request;
/// Periodic recent sync
pub mod scheduler;
/// Provider health ledger and backoff
pub mod status;
/// Cursor and status storage abstraction
pub mod store;
/// Coverage-gap detection for recent syncs
pub mod sync_tracker;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, ProviderConfig};
pub use db::Database;
pub use error::{DatabaseError, Error, FailureKind, FetchError, Result};
pub use fetcher::{
    HttpExecutor, HttpResponse, PageFetcher, RateLimiter, ReqwestExecutor, ResponseParser,
    TransportError, TransportErrorKind,
};
pub use orchestrator::FetchOrchestrator;
pub use parser::FeedParser;
pub use provider::Provider;
pub use request::{OffsetPaging, PageRequest, PageableRequestSequence, RequestChain, RequestGenerator};
pub use scheduler::{ReleaseSink, SyncScheduler};
pub use status::StatusLedger;
pub use store::{MemoryStore, StateStore};
pub use sync_tracker::{SyncDecision, SyncLimits};
pub use types::{
    Event, FetchMode, FetchReport, ProviderId, ProviderStatus, Release, RunOutcome,
    SearchCriteria, SyncCursor,
};

/// Run the scheduler until a termination signal arrives, then stop it.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use indexer_sync::{SyncScheduler, run_with_shutdown};
///
/// # async fn example(scheduler: SyncScheduler) {
/// run_with_shutdown(scheduler).await;
/// # }
/// ```
pub async fn run_with_shutdown(scheduler: SyncScheduler) {
    let shutdown = scheduler.cancellation_token();
    let handle = tokio::spawn(scheduler.run());

    wait_for_signal().await;
    shutdown.cancel();

    if let Err(e) = handle.await {
        tracing::error!(error = %e, "sync scheduler task failed");
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
