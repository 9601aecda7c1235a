//! Configuration types for indexer-sync

use crate::error::{Error, Result};
use crate::types::ProviderId;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Main configuration
///
/// Every section has defaults, so `Config::default()` plus a list of providers is a
/// working setup.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Configured providers (indexers)
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Pagination and recent-sync limits
    #[serde(default)]
    pub sync: SyncConfig,

    /// Request spacing
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Failure backoff settings
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Persistence of sync cursors and provider status
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Check the configuration for values the engine cannot work with
    ///
    /// # Errors
    /// Returns [`Error::Config`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for (i, provider) in self.providers.iter().enumerate() {
            if provider.id.as_str().trim().is_empty() {
                return Err(Error::Config {
                    message: "provider id must not be empty".into(),
                    key: Some(format!("providers[{i}].id")),
                });
            }
            if !seen.insert(provider.id.clone()) {
                return Err(Error::Config {
                    message: format!("duplicate provider id '{}'", provider.id),
                    key: Some(format!("providers[{i}].id")),
                });
            }
            if url::Url::parse(&provider.base_url).is_err() {
                return Err(Error::Config {
                    message: format!("invalid base URL '{}'", provider.base_url),
                    key: Some(format!("providers[{i}].base_url")),
                });
            }
        }

        if self.sync.max_results_per_query == 0 {
            return Err(Error::Config {
                message: "max_results_per_query must be positive".into(),
                key: Some("sync.max_results_per_query".into()),
            });
        }

        if self.sync.run_timeout.is_zero() {
            return Err(Error::Config {
                message: "run_timeout must be positive".into(),
                key: Some("sync.run_timeout".into()),
            });
        }

        Ok(())
    }

    /// Look up a provider by id
    pub fn provider(&self, id: &ProviderId) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| &p.id == id)
    }
}

/// Per-provider settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Stable identifier, used as the key for status and cursor state
    pub id: ProviderId,

    /// Display name (defaults to the id)
    #[serde(default)]
    pub name: Option<String>,

    /// Base API URL
    pub base_url: String,

    /// Items per page the provider returns; 0 means no fixed page size (default: 100)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Minimum spacing between requests; never lower than the global floor
    #[serde(default, with = "optional_duration_serde")]
    pub rate_limit: Option<Duration>,

    /// Whether the provider takes part in scheduled recent syncs
    #[serde(default = "default_true")]
    pub enable_recent_sync: bool,

    /// Whether the provider answers searches
    #[serde(default = "default_true")]
    pub enable_search: bool,
}

impl ProviderConfig {
    /// Create a provider config with defaults for everything but id and URL
    pub fn new(id: impl Into<ProviderId>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            base_url: base_url.into(),
            page_size: default_page_size(),
            rate_limit: None,
            enable_recent_sync: true,
            enable_search: true,
        }
    }

    /// Display name, falling back to the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }
}

/// Pagination and recent-sync limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Hard cap of accumulated results per request sequence (default: 1000)
    #[serde(default = "default_max_results_per_query")]
    pub max_results_per_query: usize,

    /// Backlog age beyond which a capped recent sync gives up (default: 24 hours)
    #[serde(default = "default_max_backlog_age", with = "duration_serde")]
    pub max_backlog_age: Duration,

    /// Caller-level timeout for a whole run (default: 5 minutes)
    #[serde(default = "default_run_timeout", with = "duration_serde")]
    pub run_timeout: Duration,

    /// Interval between scheduled recent syncs (default: 15 minutes)
    #[serde(default = "default_sync_interval", with = "duration_serde")]
    pub interval: Duration,

    /// Add random jitter to the schedule interval (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_results_per_query: default_max_results_per_query(),
            max_backlog_age: default_max_backlog_age(),
            run_timeout: default_run_timeout(),
            interval: default_sync_interval(),
            jitter: true,
        }
    }
}

/// Request spacing configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Minimum spacing between requests to one provider (default: 2 seconds)
    #[serde(default = "default_rate_limit_floor", with = "duration_serde")]
    pub floor: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            floor: default_rate_limit_floor(),
        }
    }
}

/// HTTP client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout (default: 100 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// User agent sent to providers
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Failure backoff configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Backoff applied to a rate-limited provider that gave no Retry-After (default: 1 hour)
    #[serde(default = "default_rate_limit_backoff", with = "duration_serde")]
    pub rate_limited_default: Duration,

    /// Escalation ladder; the n-th consecutive failure disables for `periods[n]` (capped)
    #[serde(default = "default_escalation_periods", with = "duration_vec_serde")]
    pub escalation_periods: Vec<Duration>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            rate_limited_default: default_rate_limit_backoff(),
            escalation_periods: default_escalation_periods(),
        }
    }
}

/// Persistence configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./indexer-sync.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_page_size() -> usize {
    100
}

fn default_max_results_per_query() -> usize {
    1000
}

fn default_max_backlog_age() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_run_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_sync_interval() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_rate_limit_floor() -> Duration {
    Duration::from_secs(2)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(100)
}

fn default_user_agent() -> String {
    format!("indexer-sync/{}", env!("CARGO_PKG_VERSION"))
}

fn default_rate_limit_backoff() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_escalation_periods() -> Vec<Duration> {
    [
        0,
        60,
        5 * 60,
        15 * 60,
        30 * 60,
        60 * 60,
        3 * 60 * 60,
        6 * 60 * 60,
        12 * 60 * 60,
        24 * 60 * 60,
    ]
    .into_iter()
    .map(Duration::from_secs)
    .collect()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("indexer-sync.db")
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

// Vec<Duration> as a list of seconds
mod duration_vec_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(durations: &[Duration], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(durations.iter().map(Duration::as_secs))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Vec::<u64>::deserialize(deserializer)?;
        Ok(secs.into_iter().map(Duration::from_secs).collect())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.sync.max_results_per_query, 1000);
        assert_eq!(config.sync.max_backlog_age, Duration::from_secs(86_400));
        assert_eq!(config.rate_limit.floor, Duration::from_secs(2));
        assert_eq!(
            config.backoff.rate_limited_default,
            Duration::from_secs(3600)
        );
        assert_eq!(config.backoff.escalation_periods.len(), 10);
        assert_eq!(config.backoff.escalation_periods[0], Duration::ZERO);
    }

    #[test]
    fn provider_config_deserializes_with_defaults() {
        let json = r#"{"id": "nzbgeek", "base_url": "https://api.nzbgeek.info"}"#;
        let provider: ProviderConfig = serde_json::from_str(json).expect("deserialize failed");

        assert_eq!(provider.id, ProviderId::from("nzbgeek"));
        assert_eq!(provider.page_size, 100);
        assert_eq!(provider.rate_limit, None);
        assert!(provider.enable_recent_sync);
        assert!(provider.enable_search);
        assert_eq!(provider.display_name(), "nzbgeek");
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let mut provider = ProviderConfig::new("p", "https://p.example");
        provider.rate_limit = Some(Duration::from_secs(5));
        let json = serde_json::to_value(&provider).unwrap();
        assert_eq!(json["rate_limit"], 5);

        let config = Config::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["sync"]["max_backlog_age"], 86_400);
        assert_eq!(json["backoff"]["escalation_periods"][1], 60);
    }

    #[test]
    fn empty_document_yields_default_config() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.providers.is_empty());
        assert_eq!(config.sync.run_timeout, Duration::from_secs(300));
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_duplicate_provider_ids() {
        let config = Config {
            providers: vec![
                ProviderConfig::new("dup", "https://a.example"),
                ProviderConfig::new("dup", "https://b.example"),
            ],
            ..Default::default()
        };
        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("providers[1].id")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_invalid_base_url() {
        let config = Config {
            providers: vec![ProviderConfig::new("p", "not a url")],
            ..Default::default()
        };
        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("providers[0].base_url"))
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_zero_cap() {
        let mut config = Config::default();
        config.sync.max_results_per_query = 0;
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn provider_lookup_by_id() {
        let config = Config {
            providers: vec![ProviderConfig::new("a", "https://a.example")],
            ..Default::default()
        };
        assert!(config.provider(&ProviderId::from("a")).is_some());
        assert!(config.provider(&ProviderId::from("b")).is_none());
    }
}
