//! Page fetching for the portfolio pipeline.
//!
//! This crate provides:
//! - [`HttpClient`]: the injected HTTP capability, with [`ReqwestHttpClient`] for production
//! - [`Fetcher`]: entry page plus a bounded, deterministic set of same-site pages
//! - [`links`]: the secondary-link selection rule
//! - [`testing`]: a canned-response client for deterministic tests

pub mod engine;
pub mod http;
pub mod links;
pub mod testing;

pub use engine::{FetchLimits, FetchReport, Fetcher};
pub use http::{HttpClient, HttpResponse, ReqwestHttpClient};
pub use links::{LINK_KEYWORDS, SecondaryLink, select_secondary_links};
