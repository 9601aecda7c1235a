//! Fetch orchestration: drives a provider's request chain tier by tier and
//! page by page, aggregates releases, tracks sync coverage and converts
//! failures into ledger updates.
//!
//! A run never returns an error. Every outcome is reported through the
//! [`FetchReport`], the [`StatusLedger`] and the event channel.
//!
//! ## Submodules
//!
//! - [`walk`] - tier/page traversal and stop conditions

use crate::config::Config;
use crate::error::FetchError;
use crate::fetcher::{HttpExecutor, PageFetcher, RateLimiter};
use crate::provider::Provider;
use crate::request::RequestChain;
use crate::status::{LogLevel, StatusLedger, failure_policy};
use crate::store::StateStore;
use crate::sync_tracker::SyncLimits;
use crate::types::{
    Event, FetchMode, FetchReport, ProviderId, Release, RunOutcome, SearchCriteria, SyncCursor,
};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, info, warn};

mod walk;

use walk::{Walk, WalkOutput};

/// Runs recent syncs and searches against providers
pub struct FetchOrchestrator {
    fetcher: PageFetcher,
    ledger: Arc<StatusLedger>,
    store: Arc<dyn StateStore>,
    limits: SyncLimits,
    run_timeout: Duration,
    run_locks: DashMap<ProviderId, Arc<Mutex<()>>>,
    event_tx: broadcast::Sender<Event>,
}

impl FetchOrchestrator {
    /// Create an orchestrator
    ///
    /// # Arguments
    /// * `config` - Sync limits, rate-limit floor and backoff ladder are read from here
    /// * `executor` - Issues HTTP requests (usually [`ReqwestExecutor`](crate::fetcher::ReqwestExecutor))
    /// * `store` - Persistence for cursors and provider status
    pub fn new(
        config: &Config,
        executor: Arc<dyn HttpExecutor>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.floor));
        let ledger = Arc::new(StatusLedger::new(Arc::clone(&store), &config.backoff));
        let (event_tx, _rx) = broadcast::channel(1000);

        Self {
            fetcher: PageFetcher::new(executor, rate_limiter),
            ledger,
            store,
            limits: SyncLimits {
                max_results: config.sync.max_results_per_query,
                max_backlog_age: config.sync.max_backlog_age,
            },
            run_timeout: config.sync.run_timeout,
            run_locks: DashMap::new(),
            event_tx,
        }
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The provider health ledger
    pub fn ledger(&self) -> &Arc<StatusLedger> {
        &self.ledger
    }

    /// The shared per-provider rate limiter
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        self.fetcher.rate_limiter()
    }

    /// Cursor persisted by the last recent sync of `provider`
    ///
    /// # Errors
    /// Returns error if the store cannot be read
    pub async fn cursor(&self, provider: &ProviderId) -> crate::Result<Option<SyncCursor>> {
        self.store.get_cursor(provider).await
    }

    fn emit_event(&self, event: Event) {
        // no receivers is fine
        self.event_tx.send(event).ok();
    }

    /// Incremental "recent items" sync
    ///
    /// Pages back until the previous cursor is reached, then advances the
    /// cursor to the newest release of this run.
    pub async fn fetch_recent(&self, provider: &Provider) -> FetchReport {
        if !provider.config.enable_recent_sync {
            debug!(provider = %provider.id(), "recent sync disabled for provider");
            return FetchReport::empty(
                provider.id().clone(),
                FetchMode::Recent,
                RunOutcome::Skipped {
                    disabled_until: None,
                },
            );
        }

        let generator = Arc::clone(&provider.generator);
        self.run(provider, FetchMode::Recent, move || {
            generator.recent_requests()
        })
        .await
    }

    /// Search a provider
    pub async fn fetch_search(&self, provider: &Provider, criteria: &SearchCriteria) -> FetchReport {
        if !provider.config.enable_search {
            debug!(provider = %provider.id(), "search disabled for provider");
            return FetchReport::empty(
                provider.id().clone(),
                FetchMode::Search,
                RunOutcome::Skipped {
                    disabled_until: None,
                },
            );
        }

        let generator = Arc::clone(&provider.generator);
        let criteria = criteria.clone();
        self.run(provider, FetchMode::Search, move || {
            generator.search_requests(&criteria)
        })
        .await
    }

    /// Check that a provider answers with a parseable first page
    ///
    /// Ignores the disabled state and leaves the ledger and cursor untouched.
    ///
    /// # Errors
    /// Returns the classified failure of the first page request.
    pub async fn test_provider(&self, provider: &Provider) -> Result<usize, FetchError> {
        let lock = self.run_lock(provider.id());
        let _guard = lock.lock().await;

        let first = provider
            .generator
            .recent_requests()
            .into_tiers()
            .flatten()
            .flatten()
            .next()
            .ok_or_else(|| FetchError::Unclassified {
                message: "provider produced no requests".into(),
            })?;

        let page = tokio::time::timeout(self.run_timeout, self.fetcher.fetch_page(provider, &first))
            .await
            .map_err(|_| FetchError::Timeout {
                message: format!("no response within {:?}", self.run_timeout),
            })??;

        let count = page.iter().filter(|r| r.is_valid()).count();
        info!(provider = %provider.id(), count, "provider test succeeded");
        Ok(count)
    }

    fn run_lock(&self, provider: &ProviderId) -> Arc<Mutex<()>> {
        self.run_locks
            .entry(provider.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn run<F>(&self, provider: &Provider, mode: FetchMode, build_chain: F) -> FetchReport
    where
        F: FnOnce() -> RequestChain,
    {
        let id = provider.id().clone();

        // a run queued behind a failing one must see the status it left
        let lock = self.run_lock(&id);
        let _guard = lock.lock().await;

        let now = Utc::now();
        match self.ledger.status(&id).await {
            Ok(status) if status.is_disabled(now) => {
                debug!(provider = %id, disabled_until = ?status.disabled_until, "provider disabled, skipping run");
                self.emit_event(Event::ProviderSkipped {
                    provider: id.clone(),
                    disabled_until: status.disabled_until,
                });
                return FetchReport::empty(
                    id,
                    mode,
                    RunOutcome::Skipped {
                        disabled_until: status.disabled_until,
                    },
                );
            }
            Ok(_) => {}
            Err(e) => {
                let err = FetchError::Unclassified {
                    message: format!("failed to read provider status: {}", e),
                };
                return self.fail(&id, mode, Vec::new(), None, err).await;
            }
        }

        let cursor = match mode {
            FetchMode::Recent => match self.store.get_cursor(&id).await {
                Ok(cursor) => cursor,
                Err(e) => {
                    let err = FetchError::Unclassified {
                        message: format!("failed to read sync cursor: {}", e),
                    };
                    return self.fail(&id, mode, Vec::new(), None, err).await;
                }
            },
            FetchMode::Search => None,
        };

        let chain = build_chain();
        debug!(provider = %id, %mode, tiers = chain.tier_count(), "starting run");

        let walk = Walk {
            fetcher: &self.fetcher,
            provider,
            mode,
            cursor: cursor.as_ref(),
            limits: self.limits,
        };

        let output = match tokio::time::timeout(self.run_timeout, walk.run(chain)).await {
            Ok(output) => output,
            Err(_) => {
                let err = FetchError::Timeout {
                    message: format!("run exceeded {:?}", self.run_timeout),
                };
                return self.fail(&id, mode, Vec::new(), None, err).await;
            }
        };

        self.finalize(&id, mode, cursor.as_ref(), output).await
    }

    async fn finalize(
        &self,
        id: &ProviderId,
        mode: FetchMode,
        cursor: Option<&SyncCursor>,
        output: WalkOutput,
    ) -> FetchReport {
        let WalkOutput {
            releases,
            fully_updated,
            error,
        } = output;
        let releases = dedup_and_sort(releases);
        let fully_updated = (mode == FetchMode::Recent).then_some(fully_updated);

        if let Some(err) = error {
            return self.fail(id, mode, releases, fully_updated, err).await;
        }

        if mode == FetchMode::Recent {
            self.advance_cursor(id, cursor, &releases, fully_updated == Some(true))
                .await;
        }

        if let Err(e) = self.ledger.record_success(id).await {
            error!(provider = %id, error = %e, "failed to record provider success");
        }

        info!(provider = %id, %mode, count = releases.len(), "run complete");
        self.emit_event(Event::ReleasesFetched {
            provider: id.clone(),
            mode,
            count: releases.len(),
        });

        FetchReport {
            provider: id.clone(),
            mode,
            releases,
            fully_updated,
            outcome: RunOutcome::Completed,
        }
    }

    /// Report a coverage gap if any and move the cursor to the newest release
    async fn advance_cursor(
        &self,
        id: &ProviderId,
        cursor: Option<&SyncCursor>,
        releases: &[Release],
        fully_updated: bool,
    ) {
        let (Some(newest), Some(oldest)) = (releases.first(), releases.last()) else {
            return;
        };

        if let Some(previous) = cursor
            && !fully_updated
        {
            warn!(
                provider = %id,
                from = %previous.publish_date,
                to = %oldest.publish_date,
                "recent sync did not reach the previous sync point, releases may have been missed"
            );
            self.emit_event(Event::CoverageGap {
                provider: id.clone(),
                from: previous.publish_date,
                to: oldest.publish_date,
            });
        }

        let next = SyncCursor::from_release(newest, Utc::now());
        if let Err(e) = self.store.set_cursor(id, &next).await {
            error!(provider = %id, error = %e, "failed to store sync cursor");
        }
    }

    /// Record a failure and build the report
    async fn fail(
        &self,
        id: &ProviderId,
        mode: FetchMode,
        releases: Vec<Release>,
        fully_updated: Option<bool>,
        err: FetchError,
    ) -> FetchReport {
        let kind = err.kind();
        let message = err.to_string();

        match failure_policy(kind).log_level {
            LogLevel::Warn => match &err {
                FetchError::Parse { body, .. } => {
                    warn!(provider = %id, %mode, %kind, error = %message, body = %body, "run failed");
                }
                _ => warn!(provider = %id, %mode, %kind, error = %message, "run failed"),
            },
            LogLevel::Error => error!(provider = %id, %mode, %kind, error = %message, "run failed"),
        }

        let disabled_until = match self.ledger.record_fetch_failure(id, &err, Utc::now()).await {
            Ok(status) => status.disabled_until,
            Err(e) => {
                error!(provider = %id, error = %e, "failed to record provider failure");
                None
            }
        };

        self.emit_event(Event::ProviderFailed {
            provider: id.clone(),
            kind,
            error: message.clone(),
            disabled_until,
        });

        FetchReport {
            provider: id.clone(),
            mode,
            releases,
            fully_updated,
            outcome: RunOutcome::Failed { kind, message },
        }
    }
}

impl std::fmt::Debug for FetchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOrchestrator")
            .field("limits", &self.limits)
            .field("run_timeout", &self.run_timeout)
            .finish_non_exhaustive()
    }
}

/// Keep the first occurrence of each identity, newest first
fn dedup_and_sort(releases: Vec<Release>) -> Vec<Release> {
    let mut seen = HashSet::new();
    let mut unique: Vec<Release> = releases
        .into_iter()
        .filter(|release| seen.insert(release.dedup_key().to_string()))
        .collect();
    unique.sort_by(|a, b| b.publish_date.cmp(&a.publish_date));
    unique
}
