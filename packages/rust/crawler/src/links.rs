//! Deterministic secondary-link selection.
//!
//! Only links whose anchor text or path mention one of [`LINK_KEYWORDS`] are
//! candidates. Candidates are ordered by the rank of their best keyword, then
//! by discovery order, and truncated to the configured count.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use url::Url;

use portfolio_shared::{normalize_url, normalize_whitespace};

/// Keywords in priority order; earlier entries win.
pub const LINK_KEYWORDS: [&str; 8] = [
    "about",
    "company",
    "service",
    "product",
    "solution",
    "team",
    "leadership",
    "contact",
];

/// Path suffixes that never point at an HTML page.
const ASSET_SUFFIXES: [&str; 10] = [
    ".pdf", ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".zip", ".mp4", ".xml",
];

static ANCHOR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

/// A same-site link chosen for secondary fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryLink {
    /// Normalized absolute URL.
    pub url: Url,
    /// Whitespace-normalized anchor text.
    pub anchor_text: String,
    /// The keyword that qualified this link.
    pub keyword: &'static str,
}

/// Pick at most `limit` same-site links from `html`, resolved against `page_url`.
pub fn select_secondary_links(html: &str, page_url: &Url, limit: usize) -> Vec<SecondaryLink> {
    if limit == 0 {
        return Vec::new();
    }

    let doc = Html::parse_document(html);
    let page_key = normalize_url(page_url);
    let mut seen = HashSet::new();
    let mut candidates: Vec<(usize, usize, SecondaryLink)> = Vec::new();

    for (order, el) in doc.select(&ANCHOR_SEL).enumerate() {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }

        let Ok(resolved) = page_url.join(href) else {
            continue;
        };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        if !same_site(&resolved, page_url) {
            continue;
        }

        let url = normalize_url(&resolved);
        if url == page_key || is_asset(&url) {
            continue;
        }

        let anchor_text = normalize_whitespace(&el.text().collect::<String>());
        let Some(rank) = keyword_rank(&anchor_text, url.path()) else {
            continue;
        };

        if !seen.insert(url.as_str().to_string()) {
            continue;
        }

        candidates.push((
            rank,
            order,
            SecondaryLink {
                url,
                anchor_text,
                keyword: LINK_KEYWORDS[rank],
            },
        ));
    }

    candidates.sort_by_key(|(rank, order, _)| (*rank, *order));
    candidates
        .into_iter()
        .take(limit)
        .map(|(_, _, link)| link)
        .collect()
}

/// Index of the highest-priority keyword found in the anchor text or path.
fn keyword_rank(anchor_text: &str, path: &str) -> Option<usize> {
    let text = anchor_text.to_lowercase();
    let path = path.to_lowercase();
    LINK_KEYWORDS
        .iter()
        .position(|kw| text.contains(kw) || path.contains(kw))
}

/// Same host, ignoring a leading `www.`.
fn same_site(a: &Url, b: &Url) -> bool {
    fn bare(url: &Url) -> &str {
        let host = url.host_str().unwrap_or_default();
        host.strip_prefix("www.").unwrap_or(host)
    }
    !bare(a).is_empty() && bare(a) == bare(b)
}

fn is_asset(url: &Url) -> bool {
    let path = url.path().to_lowercase();
    ASSET_SUFFIXES.iter().any(|s| path.ends_with(s))
}
