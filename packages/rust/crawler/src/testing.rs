//! Deterministic [`HttpClient`] fake for tests of the Fetcher and the pipeline.
//!
//! Routes are keyed by normalized absolute URL. Unknown URLs answer `404`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use portfolio_shared::{NetworkErrorKind, PortfolioError, Result};

use crate::http::{HttpClient, HttpResponse};

#[derive(Debug, Clone)]
enum Reply {
    Respond(HttpResponse),
    Fail(NetworkErrorKind),
    Delayed(Duration, HttpResponse),
}

/// Canned-response HTTP client that records every requested URL.
#[derive(Debug, Default)]
pub struct StaticHttpClient {
    routes: HashMap<String, Reply>,
    calls: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
}

impl StaticHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `html` with status 200.
    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.route(url, Reply::Respond(HttpResponse::ok(html)))
    }

    /// Answer with an empty body and the given status.
    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.route(url, Reply::Respond(HttpResponse::status(status)))
    }

    /// Answer `301` pointing at `location`.
    pub fn with_redirect(self, url: &str, location: &str) -> Self {
        self.route(url, Reply::Respond(HttpResponse::redirect(301, location)))
    }

    /// Fail the request with a transport error of the given kind.
    pub fn with_failure(self, url: &str, kind: NetworkErrorKind) -> Self {
        self.route(url, Reply::Fail(kind))
    }

    /// Serve `html` after `delay`. A delay longer than the request timeout
    /// behaves like a client-side timeout.
    pub fn with_delayed_page(self, url: &str, delay: Duration, html: &str) -> Self {
        self.route(url, Reply::Delayed(delay, HttpResponse::ok(html)))
    }

    /// Every URL requested so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// URLs whose request ran to completion, in completion order. A request
    /// whose future was dropped mid-flight never shows up here.
    pub fn completed(&self) -> Vec<String> {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether `url` was requested at least once.
    pub fn was_requested(&self, url: &str) -> bool {
        let key = route_key(url);
        self.calls().iter().any(|c| *c == key)
    }

    fn route(mut self, url: &str, reply: Reply) -> Self {
        self.routes.insert(route_key(url), reply);
        self
    }
}

fn route_key(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

#[async_trait]
impl HttpClient for StaticHttpClient {
    async fn get(&self, url: &Url, timeout: Duration) -> Result<HttpResponse> {
        let key = url.to_string();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(key.clone());

        let result = match self.routes.get(&key).cloned() {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail(kind)) => Err(PortfolioError::network(
                key.clone(),
                kind,
                "simulated transport failure",
            )),
            Some(Reply::Delayed(delay, _)) if delay > timeout => {
                tokio::time::sleep(timeout).await;
                Err(PortfolioError::network(
                    key.clone(),
                    NetworkErrorKind::Timeout,
                    "simulated request timeout",
                ))
            }
            Some(Reply::Delayed(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            None => Ok(HttpResponse::status(404)),
        };

        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(key);
        result
    }
}
