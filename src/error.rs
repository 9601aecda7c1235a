//! Error types for indexer-sync
//!
//! This module provides:
//! - The crate-level [`Error`] used by configuration, persistence and setup code
//! - [`FetchError`], the typed failure returned by a single page fetch
//! - [`FailureKind`], the classification the status ledger and events work with

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for indexer-sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for indexer-sync
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "providers[0].base_url")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// HTTP client error outside of a page fetch (client construction etc.)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored value could not be decoded
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

/// Classification of a failed run, used by the status ledger and events
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// DNS or TCP connect failure
    ConnectionFailure,
    /// Provider signalled quota exhaustion or asked us to back off
    RateLimited,
    /// Credentials or API key rejected
    AuthFailure,
    /// Anti-bot / interactive challenge page
    ChallengeRequired,
    /// 5xx or gateway errors
    ServerUnavailable,
    /// Response body did not have the expected shape
    ParseError,
    /// Request or run timed out
    Timeout,
    /// Anything else
    Unclassified,
}

impl FailureKind {
    /// Stable string form used for persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ConnectionFailure => "connection_failure",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::AuthFailure => "auth_failure",
            FailureKind::ChallengeRequired => "challenge_required",
            FailureKind::ServerUnavailable => "server_unavailable",
            FailureKind::ParseError => "parse_error",
            FailureKind::Timeout => "timeout",
            FailureKind::Unclassified => "unclassified",
        }
    }

    /// Parse the persisted string form; unknown values map to `Unclassified`
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "connection_failure" => FailureKind::ConnectionFailure,
            "rate_limited" => FailureKind::RateLimited,
            "auth_failure" => FailureKind::AuthFailure,
            "challenge_required" => FailureKind::ChallengeRequired,
            "server_unavailable" => FailureKind::ServerUnavailable,
            "parse_error" => FailureKind::ParseError,
            "timeout" => FailureKind::Timeout,
            _ => FailureKind::Unclassified,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single page fetch
///
/// Returned by [`PageFetcher::fetch_page`](crate::fetcher::PageFetcher::fetch_page) and
/// by [`ResponseParser`](crate::fetcher::ResponseParser) implementations. The orchestrator
/// maps [`kind`](FetchError::kind) to a ledger action via
/// [`failure_policy`](crate::status::failure_policy).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// DNS resolution or TCP connect failed
    #[error("unable to connect to provider: {message}")]
    Connection {
        /// Transport error message
        message: String,
    },

    /// Provider asked us to slow down (HTTP 429, API request limit)
    #[error("provider rate limited the request{}", retry_after.map(|d| format!(", retry after {}s", d.as_secs())).unwrap_or_default())]
    RateLimited {
        /// Provider-suggested wait, if any
        retry_after: Option<Duration>,
    },

    /// Credentials or API key were rejected
    #[error("provider rejected credentials: {message}")]
    Auth {
        /// Provider message
        message: String,
    },

    /// Anti-bot challenge must be solved manually
    #[error("provider requires an interactive challenge ({})", if *expired { "clearance expired" } else { "clearance required" })]
    Challenge {
        /// True when a previously obtained clearance was sent and rejected
        expired: bool,
    },

    /// Provider-side outage (5xx, gateway errors)
    #[error("provider unavailable (HTTP {status})")]
    ServerUnavailable {
        /// HTTP status code
        status: u16,
    },

    /// Unexpected HTTP status
    #[error("unexpected HTTP status {status}")]
    Protocol {
        /// HTTP status code
        status: u16,
    },

    /// Response body could not be interpreted
    #[error("unable to parse provider response: {message}")]
    Parse {
        /// Parser error message
        message: String,
        /// Raw body, truncated for diagnostics
        body: String,
    },

    /// Request timed out
    #[error("request timed out: {message}")]
    Timeout {
        /// Description of what timed out
        message: String,
    },

    /// Anything else
    #[error("{message}")]
    Unclassified {
        /// Error message
        message: String,
    },
}

/// Largest response body kept on a [`FetchError::Parse`]
pub const MAX_DIAGNOSTIC_BODY: usize = 4096;

impl FetchError {
    /// Build a parse error, truncating `body` to [`MAX_DIAGNOSTIC_BODY`] bytes
    pub fn parse(message: impl Into<String>, body: &str) -> Self {
        FetchError::Parse {
            message: message.into(),
            body: truncate_body(body, MAX_DIAGNOSTIC_BODY),
        }
    }

    /// Failure classification for ledger and event purposes
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Connection { .. } => FailureKind::ConnectionFailure,
            FetchError::RateLimited { .. } => FailureKind::RateLimited,
            FetchError::Auth { .. } => FailureKind::AuthFailure,
            FetchError::Challenge { .. } => FailureKind::ChallengeRequired,
            FetchError::ServerUnavailable { .. } => FailureKind::ServerUnavailable,
            FetchError::Parse { .. } => FailureKind::ParseError,
            FetchError::Timeout { .. } => FailureKind::Timeout,
            FetchError::Protocol { .. } | FetchError::Unclassified { .. } => {
                FailureKind::Unclassified
            }
        }
    }

    /// Provider-suggested backoff, if the failure carries one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether the failure is expected to clear up on its own by the next scheduled run
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Connection { .. }
                | FetchError::RateLimited { .. }
                | FetchError::ServerUnavailable { .. }
                | FetchError::Timeout { .. }
        )
    }
}

/// Truncate `body` to at most `max` bytes without splitting a UTF-8 character
pub(crate) fn truncate_body(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}
