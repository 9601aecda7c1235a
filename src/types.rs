//! Core types for indexer-sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::FailureKind;

/// Stable identifier of a configured provider (indexer)
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub String);

impl ProviderId {
    /// Create a new ProviderId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ProviderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A candidate release discovered on a provider
///
/// Releases are immutable once built by a [`ResponseParser`](crate::fetcher::ResponseParser);
/// the fetcher only stamps the provider fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Release title as published by the provider
    pub title: String,

    /// Download locator (NZB or torrent URL). Empty means invalid.
    pub download_url: String,

    /// Provider-specific unique key (RSS guid / Atom id)
    pub guid: Option<String>,

    /// Details page on the provider
    pub info_url: Option<String>,

    /// Publication time
    pub publish_date: DateTime<Utc>,

    /// Size in bytes, when the provider reports one
    pub size: Option<u64>,

    /// Provider this release was fetched from
    pub provider: ProviderId,

    /// Display name of the provider
    pub provider_name: String,
}

impl Release {
    /// Create a release with only the required fields set
    pub fn new(
        title: impl Into<String>,
        download_url: impl Into<String>,
        publish_date: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.into(),
            download_url: download_url.into(),
            guid: None,
            info_url: None,
            publish_date,
            size: None,
            provider: ProviderId::default(),
            provider_name: String::new(),
        }
    }

    /// A release is valid when it has a non-empty download locator
    pub fn is_valid(&self) -> bool {
        !self.download_url.trim().is_empty()
    }

    /// Key used for de-duplication: the provider guid when present, else the download URL
    pub fn dedup_key(&self) -> &str {
        match self.guid.as_deref() {
            Some(guid) if !guid.is_empty() => guid,
            _ => &self.download_url,
        }
    }

    /// SHA-256 hex digest of [`dedup_key`](Self::dedup_key)
    pub fn identity(&self) -> String {
        let digest = Sha256::digest(self.dedup_key().as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Persisted high-water mark of the last confirmed recent-sync release
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Publish time of the newest release seen by the last recent sync
    pub publish_date: DateTime<Utc>,
    /// Its download locator
    pub download_url: String,
    /// Stable identity token (see [`Release::identity`])
    pub identity: String,
    /// Its title, for diagnostics
    pub title: String,
    /// When the cursor was written
    pub updated_at: DateTime<Utc>,
}

impl SyncCursor {
    /// Build a cursor pointing at `release`
    pub fn from_release(release: &Release, now: DateTime<Utc>) -> Self {
        Self {
            publish_date: release.publish_date,
            download_url: release.download_url.clone(),
            identity: release.identity(),
            title: release.title.clone(),
            updated_at: now,
        }
    }
}

/// Per-provider health and backoff ledger entry
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatus {
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Index into the escalation backoff periods
    pub escalation_level: usize,
    /// Start of the current failure streak
    pub initial_failure: Option<DateTime<Utc>>,
    /// Most recent failure
    pub most_recent_failure: Option<DateTime<Utc>>,
    /// Provider must not be queried before this time
    pub disabled_until: Option<DateTime<Utc>>,
    /// Last successful run
    pub last_success: Option<DateTime<Utc>>,
    /// Kind of the most recent failure
    pub last_failure_kind: Option<FailureKind>,
}

impl ProviderStatus {
    /// Whether the provider is disabled at `now`
    pub fn is_disabled(&self, now: DateTime<Utc>) -> bool {
        self.disabled_until.is_some_and(|until| until > now)
    }
}

/// Which kind of fetch a run performs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Incremental "what's new" sync
    Recent,
    /// On-demand search
    Search,
}

impl std::fmt::Display for FetchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchMode::Recent => f.write_str("recent"),
            FetchMode::Search => f.write_str("search"),
        }
    }
}

/// Opaque search criteria handed to a provider's request generator
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// Free-text query
    pub query: Option<String>,
    /// External series identifier (TVDB/TVMaze/...)
    pub series_id: Option<String>,
    /// Season number
    pub season: Option<u32>,
    /// Episode number
    pub episode: Option<u32>,
}

/// How a run ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// All tiers/pages walked without error
    Completed,
    /// Provider was disabled; nothing was fetched
    Skipped {
        /// When the provider becomes eligible again
        disabled_until: Option<DateTime<Utc>>,
    },
    /// The run stopped on a classified failure
    Failed {
        /// Failure classification
        kind: FailureKind,
        /// Human-readable error
        message: String,
    },
}

/// Result of one orchestration run
///
/// A run never returns an error to its caller: failures are reflected in
/// `outcome` and have already been recorded on the status ledger.
#[derive(Clone, Debug)]
pub struct FetchReport {
    /// Provider that was queried
    pub provider: ProviderId,
    /// Run mode
    pub mode: FetchMode,
    /// De-duplicated, valid releases, newest first
    pub releases: Vec<Release>,
    /// Recent mode only: whether the run confirmed full coverage since the cursor
    pub fully_updated: Option<bool>,
    /// How the run ended
    pub outcome: RunOutcome,
}

impl FetchReport {
    pub(crate) fn empty(provider: ProviderId, mode: FetchMode, outcome: RunOutcome) -> Self {
        Self {
            provider,
            mode,
            releases: Vec::new(),
            fully_updated: None,
            outcome,
        }
    }

    /// Whether the run completed without error
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed)
    }
}

/// Events emitted by the orchestrator
///
/// Subscribe via [`FetchOrchestrator::subscribe`](crate::FetchOrchestrator::subscribe).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run finished and produced releases
    ReleasesFetched {
        /// Provider
        provider: ProviderId,
        /// Run mode
        mode: FetchMode,
        /// Number of releases returned
        count: usize,
    },

    /// A recent sync could not confirm coverage back to the previous cursor
    CoverageGap {
        /// Provider
        provider: ProviderId,
        /// Publish time of the previous cursor
        from: DateTime<Utc>,
        /// Oldest release of this run
        to: DateTime<Utc>,
    },

    /// A run failed and the provider was put into backoff
    ProviderFailed {
        /// Provider
        provider: ProviderId,
        /// Failure classification
        kind: FailureKind,
        /// Error message
        error: String,
        /// Backoff end
        #[serde(skip_serializing_if = "Option::is_none")]
        disabled_until: Option<DateTime<Utc>>,
    },

    /// A run was skipped because the provider is in backoff
    ProviderSkipped {
        /// Provider
        provider: ProviderId,
        /// Backoff end
        #[serde(skip_serializing_if = "Option::is_none")]
        disabled_until: Option<DateTime<Utc>>,
    },
}
