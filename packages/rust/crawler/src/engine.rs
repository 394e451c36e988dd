//! Bounded, same-site page fetcher.
//!
//! The Fetcher retrieves the entry page, picks a small fixed set of secondary
//! links from it, and fetches those concurrently. The whole fetch runs
//! against one deadline: the entry page missing it is fatal, a secondary page
//! missing it becomes a warning.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::{Host, Url};

use portfolio_shared::{
    ErrorKind, FetchedPage, NetworkErrorKind, PipelineOptions, PortfolioError, Result, SourceUrl,
    Stage, StageWarning,
};

use crate::http::HttpClient;
use crate::links::select_secondary_links;

// ---------------------------------------------------------------------------
// Limits & report
// ---------------------------------------------------------------------------

/// Bounds applied to every fetch.
#[derive(Debug, Clone)]
pub struct FetchLimits {
    /// Timeout handed to the HTTP client for each request.
    pub request_timeout: Duration,
    /// Redirect hops followed before failing with `TooManyRedirects`.
    pub max_redirects: usize,
    /// Secondary links fetched besides the entry page.
    pub max_secondary_pages: usize,
    /// Allow loopback/private hosts (local testing only).
    pub allow_private_hosts: bool,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self::from(&PipelineOptions::default())
    }
}

impl From<&PipelineOptions> for FetchLimits {
    fn from(opts: &PipelineOptions) -> Self {
        Self {
            request_timeout: opts.request_timeout,
            max_redirects: opts.max_redirects,
            max_secondary_pages: opts.max_secondary_pages,
            allow_private_hosts: opts.allow_private_hosts,
        }
    }
}

/// Pages fetched for one run, entry page first, plus tolerated failures.
#[derive(Debug, Clone)]
pub struct FetchReport {
    /// Entry page followed by secondary pages in discovery order.
    pub pages: Vec<FetchedPage>,
    /// One warning per failed secondary page.
    pub warnings: Vec<StageWarning>,
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Fetches an entry page and a bounded set of same-site secondary pages.
pub struct Fetcher {
    client: Arc<dyn HttpClient>,
    limits: FetchLimits,
}

impl Fetcher {
    pub fn new(client: Arc<dyn HttpClient>, limits: FetchLimits) -> Self {
        Self { client, limits }
    }

    /// Fetch `url` and its selected secondary pages within `budget`.
    ///
    /// Fails only when the entry page cannot be fetched; the caller owns retries.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &SourceUrl, budget: Duration) -> Result<FetchReport> {
        let deadline = Instant::now() + budget;

        info!(
            budget_ms = budget.as_millis() as u64,
            max_secondary_pages = self.limits.max_secondary_pages,
            "fetching entry page"
        );

        let entry = match tokio::time::timeout_at(
            deadline,
            fetch_page(self.client.as_ref(), url.as_url(), &self.limits),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!("entry page exceeded the fetch budget");
                return Err(PortfolioError::Timeout {
                    stage: Stage::Fetch,
                });
            }
        };

        let secondary_links =
            select_secondary_links(&entry.body, &entry.url, self.limits.max_secondary_pages);
        debug!(count = secondary_links.len(), "secondary links selected");

        // Spawn every secondary fetch up front. The set aborts whatever is still
        // running when it is dropped, so cancelling `fetch` cancels the requests.
        let mut tasks = JoinSet::new();
        for (index, link) in secondary_links.iter().enumerate() {
            let client = Arc::clone(&self.client);
            let limits = self.limits.clone();
            let link_url = link.url.clone();
            tasks.spawn(async move {
                let result =
                    tokio::time::timeout_at(deadline, fetch_page(client.as_ref(), &link_url, &limits))
                        .await;
                (index, result)
            });
        }

        let mut results: Vec<Option<_>> = std::iter::repeat_with(|| None)
            .take(secondary_links.len())
            .collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => warn!(error = %e, "secondary fetch task failed"),
            }
        }

        // Merge in discovery order.
        let mut pages = vec![entry];
        let mut warnings = Vec::new();

        for (link, result) in secondary_links.iter().zip(results) {
            let failure = match result {
                Some(Ok(Ok(page))) => {
                    if pages.iter().any(|p| p.content_hash == page.content_hash) {
                        debug!(url = %link.url, "duplicate page body, skipping");
                    } else {
                        pages.push(page);
                    }
                    continue;
                }
                Some(Ok(Err(e))) => (e.kind(), e.to_string()),
                Some(Err(_)) => (
                    ErrorKind::Timeout(Stage::Fetch),
                    "fetch budget exhausted before the page arrived".to_string(),
                ),
                None => (ErrorKind::Internal, "fetch task failed".to_string()),
            };

            warn!(url = %link.url, kind = %failure.0, error = %failure.1, "secondary page failed");
            warnings.push(StageWarning {
                stage: Stage::Fetch,
                url: Some(link.url.to_string()),
                kind: failure.0,
                message: failure.1,
            });
        }

        info!(
            pages = pages.len(),
            warnings = warnings.len(),
            "fetch completed"
        );

        Ok(FetchReport { pages, warnings })
    }
}

// ---------------------------------------------------------------------------
// Page fetching
// ---------------------------------------------------------------------------

/// Fetch a single page, following redirects up to the configured bound.
async fn fetch_page(client: &dyn HttpClient, url: &Url, limits: &FetchLimits) -> Result<FetchedPage> {
    let mut current = url.clone();
    let mut redirects = 0;

    loop {
        if !limits.allow_private_hosts && is_private_target(&current) {
            return Err(PortfolioError::invalid_url(
                current.as_str(),
                "refusing to fetch a private or loopback host",
            ));
        }

        debug!(url = %current, redirects, "fetching page");
        let response = client.get(&current, limits.request_timeout).await?;

        if response.is_redirect() {
            let Some(location) = response.location.as_deref() else {
                return Err(PortfolioError::network(
                    current.as_str(),
                    NetworkErrorKind::HttpStatus(response.status),
                    "redirect without a Location header",
                ));
            };
            if redirects >= limits.max_redirects {
                return Err(PortfolioError::TooManyRedirects {
                    url: url.to_string(),
                    limit: limits.max_redirects,
                });
            }
            redirects += 1;
            current = current
                .join(location)
                .map_err(|e| PortfolioError::invalid_url(location, e.to_string()))?;
            continue;
        }

        if response.status >= 400 {
            return Err(PortfolioError::network(
                current.as_str(),
                NetworkErrorKind::HttpStatus(response.status),
                format!("HTTP {}", response.status),
            ));
        }

        return Ok(FetchedPage {
            content_hash: compute_hash(&response.body),
            url: current,
            status: response.status,
            body: response.body,
            fetched_at: Utc::now(),
        });
    }
}

/// Compute SHA-256 hash of content.
fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a loopback, private, or otherwise local resource.
fn is_private_target(url: &Url) -> bool {
    match url.host() {
        Some(Host::Ipv4(ip)) => is_private_v4(&ip),
        Some(Host::Ipv6(ip)) => is_private_v6(&ip),
        Some(Host::Domain(host)) => {
            let host = host.to_ascii_lowercase();
            host == "localhost"
                || host.ends_with(".localhost")
                || host.ends_with(".local")
                || host.ends_with(".internal")
        }
        None => true,
    }
}

fn is_private_v4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_unspecified()
        // 100.64.0.0/10 (Carrier-grade NAT)
        || (octets[0] == 100 && (octets[1] & 0xC0) == 64)
        // 192.0.0.0/24
        || (octets[0] == 192 && octets[1] == 0 && octets[2] == 0)
}

fn is_private_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticHttpClient;

    fn limits() -> FetchLimits {
        FetchLimits {
            request_timeout: Duration::from_secs(5),
            max_redirects: 5,
            max_secondary_pages: 3,
            allow_private_hosts: false,
        }
    }

    fn source(url: &str) -> SourceUrl {
        SourceUrl::parse(url).unwrap()
    }

    const HOME: &str = r#"<html><body>
        <h1>Acme Anvils</h1>
        <a href="/about">About us</a>
        <a href="/services">Services</a>
        <a href="/contact">Contact</a>
        <a href="/blog">Blog</a>
    </body></html>"#;

    #[tokio::test]
    async fn fetches_entry_then_secondary_pages_in_order() {
        let client = StaticHttpClient::new()
            .with_page("https://acme.test/", HOME)
            .with_page("https://acme.test/about", "<p>About Acme</p>")
            .with_page("https://acme.test/services", "<p>Our services</p>")
            .with_page("https://acme.test/contact", "<p>Call us</p>");
        let client = Arc::new(client);

        let fetcher = Fetcher::new(client.clone(), limits());
        let report = fetcher
            .fetch(&source("https://acme.test"), Duration::from_secs(5))
            .await
            .unwrap();

        let urls: Vec<&str> = report.pages.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://acme.test/",
                "https://acme.test/about",
                "https://acme.test/services",
                "https://acme.test/contact",
            ]
        );
        assert!(report.warnings.is_empty());
        assert!(!client.was_requested("https://acme.test/blog"));
    }

    #[tokio::test]
    async fn secondary_failures_become_warnings() {
        let client = StaticHttpClient::new()
            .with_page("https://acme.test/", HOME)
            .with_failure("https://acme.test/about", NetworkErrorKind::Timeout)
            .with_status("https://acme.test/services", 500)
            .with_page("https://acme.test/contact", "<p>Call us</p>");

        let fetcher = Fetcher::new(Arc::new(client), limits());
        let report = fetcher
            .fetch(&source("https://acme.test/"), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(report.pages.len(), 2);
        assert_eq!(report.warnings.len(), 2);
        assert_eq!(
            report.warnings[0].kind,
            ErrorKind::Network(NetworkErrorKind::Timeout)
        );
        assert_eq!(
            report.warnings[1].kind,
            ErrorKind::Network(NetworkErrorKind::HttpStatus(500))
        );
        assert_eq!(
            report.warnings[0].url.as_deref(),
            Some("https://acme.test/about")
        );
    }

    #[tokio::test]
    async fn entry_failure_is_fatal() {
        let client = StaticHttpClient::new().with_failure("https://acme.test/", NetworkErrorKind::Dns);
        let fetcher = Fetcher::new(Arc::new(client), limits());
        let err = fetcher
            .fetch(&source("https://acme.test/"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network(NetworkErrorKind::Dns));
    }

    #[tokio::test]
    async fn entry_http_error_status_is_fatal() {
        let client = StaticHttpClient::new().with_status("https://acme.test/", 404);
        let fetcher = Fetcher::new(Arc::new(client), limits());
        let err = fetcher
            .fetch(&source("https://acme.test/"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(
            err.kind(),
            ErrorKind::Network(NetworkErrorKind::HttpStatus(404))
        );
    }

    #[tokio::test]
    async fn follows_redirects_up_to_limit() {
        let mut client = StaticHttpClient::new();
        for i in 0..5 {
            client = client.with_redirect(
                &format!("https://acme.test/hop{i}"),
                &format!("/hop{}", i + 1),
            );
        }
        let client = client.with_page("https://acme.test/hop5", "<p>landed</p>");

        let fetcher = Fetcher::new(Arc::new(client), limits());
        let report = fetcher
            .fetch(&source("https://acme.test/hop0"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(report.pages[0].url.as_str(), "https://acme.test/hop5");
        assert_eq!(report.pages[0].status, 200);
    }

    #[tokio::test]
    async fn too_many_redirects() {
        let mut client = StaticHttpClient::new();
        for i in 0..6 {
            client = client.with_redirect(
                &format!("https://acme.test/hop{i}"),
                &format!("/hop{}", i + 1),
            );
        }
        let client = client.with_page("https://acme.test/hop6", "<p>too far</p>");

        let fetcher = Fetcher::new(Arc::new(client), limits());
        let err = fetcher
            .fetch(&source("https://acme.test/hop0"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooManyRedirects);
    }

    #[tokio::test]
    async fn entry_page_past_budget_times_out() {
        let client = StaticHttpClient::new().with_delayed_page(
            "https://acme.test/",
            Duration::from_secs(5),
            HOME,
        );
        let fetcher = Fetcher::new(Arc::new(client), limits());
        let err = fetcher
            .fetch(&source("https://acme.test/"), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout(Stage::Fetch));
    }

    #[tokio::test]
    async fn slow_secondary_page_is_cut_at_deadline() {
        let client = StaticHttpClient::new()
            .with_page("https://acme.test/", r#"<a href="/about">About</a>"#)
            .with_delayed_page("https://acme.test/about", Duration::from_secs(5), "<p>late</p>");
        let fetcher = Fetcher::new(Arc::new(client), limits());
        let report = fetcher
            .fetch(&source("https://acme.test/"), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(report.pages.len(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].kind, ErrorKind::Timeout(Stage::Fetch));
    }

    #[tokio::test]
    async fn cancelled_fetch_aborts_outstanding_secondary_requests() {
        let client = Arc::new(
            StaticHttpClient::new()
                .with_page(
                    "https://acme.test/",
                    r#"<a href="/about">About</a> <a href="/services">Services</a>"#,
                )
                .with_delayed_page("https://acme.test/about", Duration::from_millis(300), "<p>a</p>")
                .with_delayed_page("https://acme.test/services", Duration::from_millis(300), "<p>s</p>"),
        );
        let fetcher = Fetcher::new(client.clone(), limits());

        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            fetcher.fetch(&source("https://acme.test/"), Duration::from_secs(20)),
        )
        .await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(client.was_requested("https://acme.test/about"));
        assert!(client.was_requested("https://acme.test/services"));
        assert_eq!(client.completed(), vec!["https://acme.test/"]);
    }

    #[tokio::test]
    async fn duplicate_bodies_are_dropped() {
        let client = StaticHttpClient::new()
            .with_page("https://acme.test/", r#"<a href="/about">About</a>"#)
            .with_page("https://acme.test/about", r#"<a href="/about">About</a>"#);
        let fetcher = Fetcher::new(Arc::new(client), limits());
        let report = fetcher
            .fetch(&source("https://acme.test/"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(report.pages.len(), 1);
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn private_hosts_are_refused() {
        let client = StaticHttpClient::new().with_page("http://127.0.0.1:8080/", HOME);
        let fetcher = Fetcher::new(Arc::new(client), limits());
        let err = fetcher
            .fetch(&source("http://127.0.0.1:8080/"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidUrl);
    }

    #[tokio::test]
    async fn fetch_with_mock_server() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::path("/"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(HOME))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::path("/about"))
            .respond_with(
                wiremock::ResponseTemplate::new(301).insert_header("Location", "/about-us"),
            )
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::path("/about-us"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_string("<p>Founded in 1949</p>"),
            )
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::path("/services"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::path("/contact"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_string("<p>hello@acme.test</p>"),
            )
            .mount(&server)
            .await;

        let mut limits = limits();
        limits.allow_private_hosts = true;
        let client = Arc::new(crate::ReqwestHttpClient::new().unwrap());
        let fetcher = Fetcher::new(client, limits);

        let report = fetcher
            .fetch(&source(&server.uri()), Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(report.pages.len(), 3);
        assert!(report.pages[1].url.path().ends_with("/about-us"));
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(
            report.warnings[0].kind,
            ErrorKind::Network(NetworkErrorKind::HttpStatus(404))
        );
    }

    #[test]
    fn test_compute_hash() {
        let hash = compute_hash("hello world");
        assert_eq!(hash.len(), 64); // SHA-256 = 64 hex chars
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_private_targets() {
        for url in [
            "http://192.168.1.1/admin",
            "http://10.0.0.1/",
            "http://127.0.0.1:8080/",
            "http://localhost:3000/api",
            "http://[::1]/",
            "http://printer.local/",
        ] {
            assert!(is_private_target(&Url::parse(url).unwrap()), "{url}");
        }
        assert!(!is_private_target(
            &Url::parse("https://www.acme.test/").unwrap()
        ));
        assert!(!is_private_target(&Url::parse("http://8.8.8.8/").unwrap()));
    }
}
