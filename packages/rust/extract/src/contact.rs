//! Contact details and company-name hints.
//!
//! These read the raw page HTML rather than the extracted blocks, since
//! phone numbers, profile links and logos usually live in the chrome that
//! block extraction strips.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use portfolio_shared::{ContactInfo, FetchedPage, normalize_whitespace};

/// Social networks recognized in anchors, keyed by the name used in
/// [`ContactInfo::socials`].
const SOCIAL_HOSTS: [(&str, &[&str]); 4] = [
    ("linkedin", &["linkedin.com"]),
    ("instagram", &["instagram.com"]),
    ("facebook", &["facebook.com", "fb.com"]),
    ("twitter", &["twitter.com", "x.com"]),
];

/// Title segments that never name the company.
const GENERIC_TITLES: [&str; 4] = ["home", "homepage", "welcome", "index"];

const MIN_PHONE_DIGITS: usize = 10;
const MAX_PHONE_DIGITS: usize = 13;

/// Address lines shorter or longer than this (in chars) are prose or labels.
const MIN_ADDRESS_CHARS: usize = 31;
const MAX_ADDRESS_CHARS: usize = 199;

static ANCHOR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));
static IMG_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img").expect("valid selector"));
static BODY_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("valid selector"));
static SITE_NAME_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"meta[property="og:site_name"]"#).expect("valid selector")
});
static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("valid regex")
});
static TITLE_SEP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\||\s-\s|\u{2013}|\u{2014}|\u{00b7}|:\s").expect("valid regex")
});
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\d[\d\s\-().]{8,18}\d").expect("valid regex"));
static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(street|road|avenue|boulevard|lane|floor|building|suite|office|p\.?\s?o\.?\s?box)\b")
        .expect("valid regex")
});

/// Order-preserving set.
#[derive(Default)]
struct Ordered {
    seen: HashSet<String>,
    items: Vec<String>,
}

impl Ordered {
    fn push(&mut self, item: String) {
        if self.seen.insert(item.clone()) {
            self.items.push(item);
        }
    }
}

/// Gather emails, phone numbers, postal addresses, social profiles and a logo
/// from all pages.
///
/// Earlier pages and earlier document positions win.
pub fn extract_contact(pages: &[FetchedPage]) -> ContactInfo {
    let mut emails = Ordered::default();
    let mut phones = Ordered::default();
    let mut addresses = Ordered::default();
    let mut info = ContactInfo::default();

    for page in pages {
        let doc = Html::parse_document(&page.body);

        for a in doc.select(&ANCHOR_SEL) {
            let Some(href) = a.value().attr("href").map(str::trim) else {
                continue;
            };
            if let Some(address) = strip_scheme(href, "mailto:") {
                let address = address.split('?').next().unwrap_or_default();
                if let Some(email) = clean_email(address) {
                    emails.push(email);
                }
            } else if let Some(number) = strip_scheme(href, "tel:") {
                if let Some(phone) = clean_phone(number) {
                    phones.push(phone);
                }
            } else if let Ok(url) = page.url.join(href) {
                if let Some(network) = social_network(&url) {
                    info.socials
                        .entry(network.to_string())
                        .or_insert_with(|| url.to_string());
                }
            }
        }

        let nodes = visible_text_nodes(&doc);
        for line in nodes.iter().flat_map(|node| node.lines()) {
            if let Some(address) = address_line(line) {
                addresses.push(address);
            }
        }

        let text = nodes.join(" ");
        for m in EMAIL_RE.find_iter(&text) {
            if let Some(email) = clean_email(m.as_str()) {
                emails.push(email);
            }
        }
        for m in PHONE_RE.find_iter(&text) {
            if let Some(phone) = clean_phone(m.as_str()) {
                phones.push(phone);
            }
        }

        if info.logo.is_none() {
            info.logo = find_logo(&doc, &page.url);
        }
    }

    info.emails = emails.items;
    info.phones = phones.items;
    info.addresses = addresses.items;
    debug!(
        emails = info.emails.len(),
        phones = info.phones.len(),
        addresses = info.addresses.len(),
        socials = info.socials.len(),
        has_logo = info.logo.is_some(),
        "contact info extracted"
    );
    info
}

/// Best-effort company name for `page`: `og:site_name`, then the leading
/// `<title>` segment, then the host without `www.`.
pub fn company_hint(page: &FetchedPage) -> String {
    let doc = Html::parse_document(&page.body);

    let site_name = doc
        .select(&SITE_NAME_SEL)
        .filter_map(|m| m.value().attr("content"))
        .map(normalize_whitespace)
        .find(|name| !name.is_empty());
    if let Some(name) = site_name {
        return name;
    }

    let from_title = doc
        .select(&TITLE_SEL)
        .next()
        .map(|t| t.text().collect::<String>())
        .and_then(|title| title_segment(&title));
    if let Some(name) = from_title {
        return name;
    }

    let host = page.url.host_str().unwrap_or_default();
    host.strip_prefix("www.").unwrap_or(host).to_string()
}

/// First non-generic segment of a title split on common separators. A bare
/// hyphen only separates when spaced, so `Coca-Cola` survives.
fn title_segment(title: &str) -> Option<String> {
    TITLE_SEP_RE
        .split(title)
        .map(normalize_whitespace)
        .find(|segment| {
            !segment.is_empty() && !GENERIC_TITLES.contains(&segment.to_lowercase().as_str())
        })
}

fn strip_scheme<'a>(href: &'a str, scheme: &str) -> Option<&'a str> {
    let head = href.get(..scheme.len())?;
    head.eq_ignore_ascii_case(scheme)
        .then(|| &href[scheme.len()..])
}

fn clean_email(raw: &str) -> Option<String> {
    let email = raw.trim().trim_end_matches('.').to_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || !domain.contains('.') {
        return None;
    }
    // Retina asset names such as `logo@2x.png` match the pattern.
    let is_asset = [".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"]
        .iter()
        .any(|ext| domain.ends_with(ext));
    (!is_asset).then_some(email)
}

/// Keep a leading `+` and the digits; reject counts outside 10..=13.
fn clean_phone(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len()) {
        return None;
    }
    if raw.starts_with('+') {
        Some(format!("+{digits}"))
    } else {
        Some(digits)
    }
}

/// A line naming a street, floor, suite or similar, with at least one digit.
fn address_line(line: &str) -> Option<String> {
    let line = normalize_whitespace(line);
    let chars = line.chars().count();
    let plausible = (MIN_ADDRESS_CHARS..=MAX_ADDRESS_CHARS).contains(&chars)
        && line.chars().any(|c| c.is_ascii_digit())
        && ADDRESS_RE.is_match(&line);
    plausible.then_some(line)
}

fn social_network(url: &Url) -> Option<&'static str> {
    let host = url.host_str()?.to_ascii_lowercase();
    SOCIAL_HOSTS.iter().find_map(|(name, domains)| {
        domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")))
            .then_some(*name)
    })
}

fn find_logo(doc: &Html, page_url: &Url) -> Option<String> {
    doc.select(&IMG_SEL).find_map(|img| {
        let src = img.value().attr("src").map(str::trim).filter(|s| !s.is_empty())?;
        let alt = img.value().attr("alt").unwrap_or_default();
        let mentions_logo =
            src.to_lowercase().contains("logo") || alt.to_lowercase().contains("logo");
        if !mentions_logo {
            return None;
        }
        page_url.join(src).ok().map(|u| u.to_string())
    })
}

/// Body text nodes in document order, skipping script-like subtrees.
fn visible_text_nodes(doc: &Html) -> Vec<&str> {
    let Some(body) = doc.select(&BODY_SEL).next() else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut stack = vec![*body];
    while let Some(node) = stack.pop() {
        if let Some(text) = node.value().as_text() {
            out.push(&**text);
            continue;
        }
        let skipped = node.value().as_element().is_some_and(|el| {
            matches!(
                el.name(),
                "script" | "style" | "noscript" | "template" | "svg"
            )
        });
        if !skipped {
            stack.extend(node.children().rev());
        }
    }
    out
}
