//! Single-page fetching: rate limiting, HTTP execution, response classification
//! and delegation to the provider's response parser.

mod http;
pub mod rate_limiter;

pub use http::ReqwestExecutor;
pub use rate_limiter::{RateLimiter, parse_retry_after};

use crate::error::FetchError;
use crate::provider::Provider;
use crate::request::PageRequest;
use crate::types::Release;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

/// Raw HTTP response handed to parsers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers (names as received)
    pub headers: Vec<(String, String)>,
    /// Response body decoded as text
    pub body: String,
    /// The executor attached a `cf_clearance` cookie of its own (cookie store)
    pub clearance_sent: bool,
}

impl HttpResponse {
    /// Successful response with the given body
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
            clearance_sent: false,
        }
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Transport-level failure category
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Name resolution failed
    Dns,
    /// TCP connect failed or was refused
    Connect,
    /// TLS handshake or certificate failure
    Tls,
    /// Request timed out
    Timeout,
    /// Anything else below HTTP
    Other,
}

/// Failure before an HTTP status was received
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    /// Failure category
    pub kind: TransportErrorKind,
    /// Underlying error message
    pub message: String,
}

impl TransportError {
    /// Build a transport error
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<TransportError> for FetchError {
    fn from(err: TransportError) -> Self {
        match err.kind {
            TransportErrorKind::Dns | TransportErrorKind::Connect => FetchError::Connection {
                message: err.message,
            },
            TransportErrorKind::Timeout => FetchError::Timeout {
                message: err.message,
            },
            TransportErrorKind::Tls | TransportErrorKind::Other => FetchError::Unclassified {
                message: err.message,
            },
        }
    }
}

/// Issues a single HTTP request
///
/// Implementations must report transport failures (DNS, connect, TLS, timeout)
/// as [`TransportError`] and return every received status, success or not, as
/// an [`HttpResponse`].
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    /// Execute `request`
    async fn execute(&self, request: &PageRequest) -> Result<HttpResponse, TransportError>;
}

/// Converts a successful response body into releases
///
/// Parsers may also detect API-level errors embedded in a 200 response
/// (for example a Newznab `<error code="100"/>`) and return the matching
/// [`FetchError`].
pub trait ResponseParser: Send + Sync {
    /// Parse one page
    fn parse(&self, response: &HttpResponse) -> Result<Vec<Release>, FetchError>;
}

/// Fetches one page for a provider
pub struct PageFetcher {
    executor: Arc<dyn HttpExecutor>,
    rate_limiter: Arc<RateLimiter>,
}

impl PageFetcher {
    /// Create a fetcher over an executor and a shared rate limiter
    pub fn new(executor: Arc<dyn HttpExecutor>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            executor,
            rate_limiter,
        }
    }

    /// The shared rate limiter
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Fetch and parse one page
    ///
    /// Waits for the provider's rate limit, issues the request, classifies
    /// non-success responses and hands the body to the provider's parser. On
    /// success every release is stamped with the provider's id and name.
    ///
    /// # Errors
    /// Returns the classified [`FetchError`]; a failed page yields no releases.
    #[instrument(skip_all, fields(provider = %provider.id(), url = %request.url))]
    pub async fn fetch_page(
        &self,
        provider: &Provider,
        request: &PageRequest,
    ) -> Result<Vec<Release>, FetchError> {
        self.rate_limiter
            .acquire(provider.id(), provider.rate_limit())
            .await;

        let response = self.executor.execute(request).await?;

        if let Err(err) = classify_response(request, &response) {
            if let FetchError::RateLimited {
                retry_after: Some(delay),
            } = &err
            {
                self.rate_limiter.record_rate_limit(provider.id(), *delay);
            }
            return Err(err);
        }

        let mut releases = provider.parser.parse(&response)?;
        for release in &mut releases {
            release.provider = provider.id().clone();
            release.provider_name = provider.name().to_string();
        }

        debug!(count = releases.len(), "fetched page");
        Ok(releases)
    }
}

/// Map a received response to `Ok(())` for 2xx or the classified failure
pub fn classify_response(request: &PageRequest, response: &HttpResponse) -> Result<(), FetchError> {
    let status = response.status;
    if (200..300).contains(&status) {
        return Ok(());
    }

    if matches!(status, 403 | 429 | 503) && is_challenge(response) {
        let expired = response.clearance_sent
            || request
                .header("cookie")
                .is_some_and(|cookie| cookie.contains("cf_clearance="));
        return Err(FetchError::Challenge { expired });
    }

    match status {
        429 => Err(FetchError::RateLimited {
            retry_after: response.header("retry-after").and_then(parse_retry_after),
        }),
        401 | 403 => Err(FetchError::Auth {
            message: format!("HTTP {status}"),
        }),
        500 | 502 | 503 | 504 | 520..=524 => Err(FetchError::ServerUnavailable { status }),
        _ => Err(FetchError::Protocol { status }),
    }
}

fn is_challenge(response: &HttpResponse) -> bool {
    if response
        .header("cf-mitigated")
        .is_some_and(|v| v.eq_ignore_ascii_case("challenge"))
    {
        return true;
    }

    let from_cloudflare = response
        .header("server")
        .is_some_and(|v| v.to_ascii_lowercase().contains("cloudflare"));
    from_cloudflare
        && (response.body.contains("challenge-platform")
            || response.body.contains("cf-chl")
            || response.body.contains("<title>Just a moment...</title>"))
}
