//! reqwest-backed [`HttpExecutor`]

use super::{HttpExecutor, HttpResponse, TransportError, TransportErrorKind};
use crate::config::HttpConfig;
use crate::error::Result;
use crate::request::PageRequest;
use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use std::error::Error as StdError;
use std::sync::Arc;
use tracing::debug;

/// Executes page requests over a shared `reqwest::Client`
///
/// Clients built by [`ReqwestExecutor::new`] keep cookies in a jar, so a
/// `cf_clearance` cookie set by the provider is replayed on later requests and
/// reported through [`HttpResponse::clearance_sent`].
#[derive(Clone, Debug)]
pub struct ReqwestExecutor {
    client: reqwest::Client,
    jar: Option<Arc<Jar>>,
}

impl ReqwestExecutor {
    /// Build the client from HTTP settings
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .cookie_provider(Arc::clone(&jar))
            .build()?;

        Ok(Self {
            client,
            jar: Some(jar),
        })
    }

    /// Wrap an already configured client
    ///
    /// Its cookie store, if any, is opaque here; clearance cookies are then
    /// only seen when the request carries them as a `Cookie` header.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client, jar: None }
    }

    /// Cookie jar of a client built by [`new`](Self::new)
    ///
    /// Lets callers import a clearance cookie obtained elsewhere.
    pub fn cookie_jar(&self) -> Option<&Arc<Jar>> {
        self.jar.as_ref()
    }

    fn has_clearance(&self, url: &url::Url) -> bool {
        self.jar
            .as_ref()
            .and_then(|jar| jar.cookies(url))
            .and_then(|value| value.to_str().map(|v| v.contains("cf_clearance=")).ok())
            .unwrap_or(false)
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(&self, request: &PageRequest) -> std::result::Result<HttpResponse, TransportError> {
        let mut builder = self.client.get(request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let clearance_sent = self.has_clearance(&request.url);
        let response = builder.send().await.map_err(transport_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.text().await.map_err(transport_error)?;

        debug!(status, bytes = body.len(), "received response");
        Ok(HttpResponse {
            status,
            headers,
            body,
            clearance_sent,
        })
    }
}

/// Categorise a reqwest failure
fn transport_error(err: reqwest::Error) -> TransportError {
    let chain = error_chain(&err);
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if chain.contains("dns") || chain.contains("failed to lookup address") {
        TransportErrorKind::Dns
    } else if chain.contains("certificate") || chain.contains("tls") || chain.contains("ssl") {
        TransportErrorKind::Tls
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    };

    TransportError::new(kind, err.to_string())
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text.to_ascii_lowercase()
}
