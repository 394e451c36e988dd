//! The HTTP capability consumed by the Fetcher, and its reqwest implementation.
//!
//! The client never follows redirects itself: it hands back the status and
//! `Location` so the Fetcher can count hops against its own bound.

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::LOCATION;
use tracing::debug;
use url::Url;

use portfolio_shared::{NetworkErrorKind, PortfolioError, Result};

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("PortfolioBuilder/", env!("CARGO_PKG_VERSION"));

/// Maximum response size we accept (5 MB).
const MAX_RESPONSE_SIZE: u64 = 5 * 1024 * 1024;

/// A single HTTP response as seen by the Fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Raw `Location` header, if any.
    pub location: Option<String>,
    pub body: String,
}

impl HttpResponse {
    /// A `200 OK` response with the given body.
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            location: None,
            body: body.into(),
        }
    }

    /// A redirect response pointing at `location`.
    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        Self {
            status,
            location: Some(location.into()),
            body: String::new(),
        }
    }

    /// An empty response with the given status.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            location: None,
            body: String::new(),
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

/// Capability: `get(url, timeout) -> {status, body}`.
///
/// Transport failures are reported as [`PortfolioError::Network`]; HTTP error
/// statuses are returned as ordinary responses.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &Url, timeout: Duration) -> Result<HttpResponse>;
}

// ---------------------------------------------------------------------------
// reqwest implementation
// ---------------------------------------------------------------------------

/// Production [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| PortfolioError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &Url, timeout: Duration) -> Result<HttpResponse> {
        let response = self
            .client
            .get(url.as_str())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| PortfolioError::network(url.as_str(), classify(&e), e.to_string()))?;

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if response.content_length().unwrap_or(0) > MAX_RESPONSE_SIZE {
            return Err(PortfolioError::network(
                url.as_str(),
                NetworkErrorKind::Transport,
                format!("response larger than {MAX_RESPONSE_SIZE} bytes"),
            ));
        }

        let body = response.text().await.map_err(|e| {
            PortfolioError::network(url.as_str(), classify(&e), format!("body read failed: {e}"))
        })?;

        debug!(%url, status, len = body.len(), "http response");

        Ok(HttpResponse {
            status,
            location,
            body,
        })
    }
}

/// Map a reqwest error onto the network failure taxonomy.
fn classify(err: &reqwest::Error) -> NetworkErrorKind {
    if err.is_timeout() {
        NetworkErrorKind::Timeout
    } else if err.is_connect() {
        if mentions_dns(err) {
            NetworkErrorKind::Dns
        } else {
            NetworkErrorKind::ConnectionRefused
        }
    } else {
        NetworkErrorKind::Transport
    }
}

/// Whether any error in the source chain looks like a name-resolution failure.
fn mentions_dns(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string().to_lowercase();
        if text.contains("dns")
            || text.contains("failed to lookup address")
            || text.contains("name or service not known")
            || text.contains("no such host")
        {
            return true;
        }
        source = inner.source();
    }
    false
}
