//! Per-provider request spacing.
//!
//! Requests to different providers proceed in parallel; requests to the same
//! provider are serialised and spaced by at least the provider's rate limit,
//! which is never allowed below the global floor. The first request to a
//! provider proceeds immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::types::ProviderId;

/// Warning threshold for cumulative delay per provider (5 minutes).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Largest Retry-After value accepted from a provider (24 hours).
const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-provider rate limiter, shared by every run through an `Arc`.
///
/// Per-provider state lives behind an `Arc` so the `DashMap` shard lock is
/// released before awaiting on the inner mutex.
#[derive(Debug)]
pub struct RateLimiter {
    /// Lower bound for every provider's spacing
    floor: Duration,

    providers: DashMap<ProviderId, Arc<ProviderState>>,
}

#[derive(Debug)]
struct ProviderState {
    /// `None` until the first request has been issued
    last_request: Mutex<Option<Instant>>,

    /// Total delay applied to this provider, in milliseconds
    cumulative_delay_ms: AtomicU64,
}

impl ProviderState {
    fn new() -> Self {
        Self {
            last_request: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

impl RateLimiter {
    /// Create a limiter whose spacing never drops below `floor`
    #[must_use]
    pub fn new(floor: Duration) -> Self {
        debug!(floor_ms = floor.as_millis(), "creating rate limiter");
        Self {
            floor,
            providers: DashMap::new(),
        }
    }

    /// The global floor
    #[must_use]
    pub fn floor(&self) -> Duration {
        self.floor
    }

    /// Effective spacing for a provider with the given configured limit
    #[must_use]
    pub fn spacing_for(&self, configured: Option<Duration>) -> Duration {
        configured.map_or(self.floor, |limit| limit.max(self.floor))
    }

    /// Wait until a request to `provider` may be issued, then mark it issued
    ///
    /// Concurrent callers for the same provider queue on the provider's mutex,
    /// so at most one request per spacing interval is released.
    #[instrument(skip(self), fields(provider = %provider))]
    pub async fn acquire(&self, provider: &ProviderId, configured: Option<Duration>) {
        let spacing = self.spacing_for(configured);

        let state = self
            .providers
            .entry(provider.clone())
            .or_insert_with(|| Arc::new(ProviderState::new()))
            .clone();

        let mut last_request = state.last_request.lock().await;

        if let Some(last) = *last_request {
            let elapsed = last.elapsed();
            if elapsed < spacing {
                let delay = spacing.saturating_sub(elapsed);
                let cumulative = state.add_cumulative_delay(delay);

                debug!(
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "applying rate limit delay"
                );

                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        cumulative_delay_secs = cumulative.as_secs(),
                        "excessive rate limiting - consider lowering the request volume to this provider"
                    );
                }

                tokio::time::sleep(delay).await;
            }
        } else {
            debug!("first request to provider - no delay");
        }

        *last_request = Some(Instant::now());
    }

    /// Record a server-mandated delay (from a Retry-After header)
    #[instrument(skip(self), fields(provider = %provider))]
    pub fn record_rate_limit(&self, provider: &ProviderId, delay: Duration) {
        let state = self
            .providers
            .entry(provider.clone())
            .or_insert_with(|| Arc::new(ProviderState::new()))
            .clone();
        let cumulative = state.add_cumulative_delay(delay);

        debug!(
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );

        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive server rate limiting - provider may be enforcing a quota"
            );
        }
    }

    /// Total delay applied to `provider` so far
    #[must_use]
    pub fn cumulative_delay(&self, provider: &ProviderId) -> Duration {
        self.providers
            .get(provider)
            .map(|state| Duration::from_millis(state.cumulative_delay_ms.load(Ordering::SeqCst)))
            .unwrap_or_default()
    }
}

/// Parse a Retry-After header value
///
/// Accepts delta-seconds (`120`) and HTTP-dates
/// (`Wed, 21 Oct 2025 07:28:00 GMT`). Dates in the past yield zero, values
/// above 24 hours are capped. Returns `None` for anything unparseable.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(duration.min(MAX_RETRY_AFTER));
    }

    match httpdate::parse_http_date(header_value) {
        Ok(datetime) => match datetime.duration_since(std::time::SystemTime::now()) {
            Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
            Err(_) => Some(Duration::ZERO),
        },
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            None
        }
    }
}
