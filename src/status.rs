//! Per-provider health ledger with escalating backoff
//!
//! Every run outcome lands here. A success clears the failure streak; a
//! failure disables the provider for a period taken from the escalation ladder,
//! stretched to cover any server-provided Retry-After. The orchestrator checks
//! [`StatusLedger::is_disabled`] before starting a run.
//!
//! Updates are read-modify-write against the [`StateStore`] and are serialised
//! per provider.

use crate::config::BackoffConfig;
use crate::error::{FailureKind, FetchError, Result};
use crate::store::StateStore;
use crate::types::{ProviderId, ProviderStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Which ledger operation a failure kind triggers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerAction {
    /// `record_failure`
    Failure,
    /// `record_connection_failure`
    ConnectionFailure,
}

/// How long a failure disables the provider
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackoffRule {
    /// Period from the escalation ladder
    Escalation,
    /// Server Retry-After, else the configured rate-limit default
    RetryAfterOrDefault,
}

/// Severity a failure is logged at
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    /// Expected operational failure
    Warn,
    /// Unexpected failure
    Error,
}

/// Handling of one [`FailureKind`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Ledger operation to apply
    pub action: LedgerAction,
    /// Disable period rule
    pub backoff: BackoffRule,
    /// Log severity
    pub log_level: LogLevel,
}

/// Policy table for failure kinds
pub fn failure_policy(kind: FailureKind) -> FailurePolicy {
    use BackoffRule::*;
    use LedgerAction::*;

    let (action, backoff, log_level) = match kind {
        FailureKind::ConnectionFailure => (ConnectionFailure, Escalation, LogLevel::Warn),
        FailureKind::RateLimited => (Failure, RetryAfterOrDefault, LogLevel::Warn),
        FailureKind::AuthFailure => (Failure, Escalation, LogLevel::Warn),
        FailureKind::ChallengeRequired => (Failure, Escalation, LogLevel::Warn),
        FailureKind::ServerUnavailable => (Failure, Escalation, LogLevel::Warn),
        FailureKind::ParseError => (Failure, Escalation, LogLevel::Warn),
        FailureKind::Timeout => (Failure, Escalation, LogLevel::Warn),
        FailureKind::Unclassified => (Failure, Escalation, LogLevel::Error),
    };

    FailurePolicy {
        action,
        backoff,
        log_level,
    }
}

/// Provider health ledger
pub struct StatusLedger {
    store: Arc<dyn StateStore>,
    periods: Vec<Duration>,
    rate_limited_default: Duration,
    locks: DashMap<ProviderId, Arc<Mutex<()>>>,
}

impl StatusLedger {
    /// Ledger over `store` using the configured backoff ladder
    pub fn new(store: Arc<dyn StateStore>, backoff: &BackoffConfig) -> Self {
        Self {
            store,
            periods: backoff.escalation_periods.clone(),
            rate_limited_default: backoff.rate_limited_default,
            locks: DashMap::new(),
        }
    }

    /// Current entry (default when the provider has never run)
    pub async fn status(&self, provider: &ProviderId) -> Result<ProviderStatus> {
        Ok(self.store.get_status(provider).await?.unwrap_or_default())
    }

    /// Whether `provider` must not be queried at `now`
    pub async fn is_disabled(&self, provider: &ProviderId, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.status(provider).await?.is_disabled(now))
    }

    /// Providers disabled at `now`, with the time each becomes eligible again
    pub async fn blocked_providers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(ProviderId, DateTime<Utc>)>> {
        Ok(self
            .store
            .all_statuses()
            .await?
            .into_iter()
            .filter_map(|(id, status)| {
                status
                    .disabled_until
                    .filter(|until| *until > now)
                    .map(|until| (id, until))
            })
            .collect())
    }

    /// Record a successful run
    pub async fn record_success(&self, provider: &ProviderId) -> Result<ProviderStatus> {
        self.record_success_at(provider, Utc::now()).await
    }

    /// [`record_success`](Self::record_success) at an explicit time
    pub async fn record_success_at(
        &self,
        provider: &ProviderId,
        now: DateTime<Utc>,
    ) -> Result<ProviderStatus> {
        self.update(provider, |status| {
            if status.consecutive_failures > 0 {
                info!(
                    provider = %provider,
                    failures = status.consecutive_failures,
                    "provider recovered"
                );
            }
            status.consecutive_failures = 0;
            status.escalation_level = 0;
            status.initial_failure = None;
            status.disabled_until = None;
            status.last_success = Some(now);
        })
        .await
    }

    /// Record a failed run; `retry_after` is a server-mandated minimum
    pub async fn record_failure(
        &self,
        provider: &ProviderId,
        kind: FailureKind,
        retry_after: Option<Duration>,
    ) -> Result<ProviderStatus> {
        self.record_failure_at(provider, kind, retry_after, Utc::now())
            .await
    }

    /// [`record_failure`](Self::record_failure) at an explicit time
    pub async fn record_failure_at(
        &self,
        provider: &ProviderId,
        kind: FailureKind,
        retry_after: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<ProviderStatus> {
        self.update(provider, |status| {
            self.apply_failure(status, kind, retry_after, true, now);
        })
        .await
    }

    /// Record a DNS/connect failure
    pub async fn record_connection_failure(&self, provider: &ProviderId) -> Result<ProviderStatus> {
        self.record_connection_failure_at(provider, Utc::now()).await
    }

    /// [`record_connection_failure`](Self::record_connection_failure) at an explicit time
    pub async fn record_connection_failure_at(
        &self,
        provider: &ProviderId,
        now: DateTime<Utc>,
    ) -> Result<ProviderStatus> {
        self.update(provider, |status| {
            self.apply_failure(status, FailureKind::ConnectionFailure, None, false, now);
        })
        .await
    }

    /// Record a classified fetch failure according to [`failure_policy`]
    pub async fn record_fetch_failure(
        &self,
        provider: &ProviderId,
        error: &FetchError,
        now: DateTime<Utc>,
    ) -> Result<ProviderStatus> {
        let kind = error.kind();
        let policy = failure_policy(kind);

        match policy.action {
            LedgerAction::ConnectionFailure => {
                self.record_connection_failure_at(provider, now).await
            }
            LedgerAction::Failure => {
                let retry_after = match policy.backoff {
                    BackoffRule::RetryAfterOrDefault => {
                        Some(error.retry_after().unwrap_or(self.rate_limited_default))
                    }
                    BackoffRule::Escalation => error.retry_after(),
                };
                self.record_failure_at(provider, kind, retry_after, now)
                    .await
            }
        }
    }

    fn period(&self, level: usize) -> Duration {
        self.periods.get(level).copied().unwrap_or_default()
    }

    fn apply_failure(
        &self,
        status: &mut ProviderStatus,
        kind: FailureKind,
        retry_after: Option<Duration>,
        escalate: bool,
        now: DateTime<Utc>,
    ) {
        let top = self.periods.len().saturating_sub(1);

        if status.consecutive_failures == 0 {
            status.initial_failure = Some(now);
        }
        status.consecutive_failures = status.consecutive_failures.saturating_add(1);
        status.most_recent_failure = Some(now);
        status.last_failure_kind = Some(kind);

        let mut level = if status.escalation_level == 0 {
            1
        } else if escalate {
            status.escalation_level + 1
        } else {
            status.escalation_level
        };
        level = level.min(top);

        if let Some(retry_after) = retry_after {
            while level < top && self.period(level) < retry_after {
                level += 1;
            }
        }
        status.escalation_level = level;

        let disable_for = retry_after.map_or(self.period(level), |r| r.max(self.period(level)));
        let disable_for = chrono::Duration::from_std(disable_for).unwrap_or(chrono::Duration::MAX);
        let until = now.checked_add_signed(disable_for).unwrap_or(DateTime::<Utc>::MAX_UTC);
        status.disabled_until = Some(until);

        debug!(
            kind = %kind,
            failures = status.consecutive_failures,
            level,
            disabled_until = %until,
            "provider disabled"
        );
    }

    async fn update<F>(&self, provider: &ProviderId, mutate: F) -> Result<ProviderStatus>
    where
        F: FnOnce(&mut ProviderStatus),
    {
        let lock = self
            .locks
            .entry(provider.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let mut status = self.status(provider).await?;
        mutate(&mut status);
        self.store.set_status(provider, &status).await?;
        Ok(status)
    }
}

impl std::fmt::Debug for StatusLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusLedger")
            .field("periods", &self.periods)
            .field("rate_limited_default", &self.rate_limited_default)
            .finish_non_exhaustive()
    }
}
