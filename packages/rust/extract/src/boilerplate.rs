//! Structural heuristics for recognizing page chrome.
//!
//! An element is boilerplate when its tag, ARIA role, visibility, class/id
//! naming, or link density marks it as navigation, a footer, a cookie notice
//! or similar. Elements that hold the page's main heading or content
//! landmarks are never dropped by naming or link density alone.

use std::collections::HashMap;
use std::sync::LazyLock;

use ego_tree::NodeId;
use scraper::{ElementRef, Node, Selector};

/// Tags that never carry portfolio text.
const SKIP_TAGS: [&str; 19] = [
    "script", "style", "noscript", "template", "svg", "iframe", "form", "button", "select",
    "nav", "aside", "canvas", "object", "embed", "dialog", "video", "audio", "picture", "map",
];

/// ARIA landmark roles used for chrome.
const CHROME_ROLES: [&str; 9] = [
    "navigation",
    "banner",
    "contentinfo",
    "complementary",
    "dialog",
    "alertdialog",
    "search",
    "menu",
    "menubar",
];

/// Class/id names (or `-`/`_` separated parts of them) that mark chrome.
const CHROME_TOKENS: [&str; 16] = [
    "nav",
    "navbar",
    "navigation",
    "menu",
    "footer",
    "sidebar",
    "breadcrumb",
    "breadcrumbs",
    "cookie",
    "cookies",
    "consent",
    "gdpr",
    "modal",
    "popup",
    "newsletter",
    "skip",
];

/// Minimum anchors before link density is considered.
const LINK_DENSITY_MIN_LINKS: usize = 3;

static LANDMARK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, main, article, [role=\"main\"]").expect("valid selector"));

/// Text and link totals for one subtree, the root included.
#[derive(Debug, Default, Clone, Copy)]
struct Subtree {
    /// Non-whitespace characters of all text.
    chars: usize,
    links: usize,
    /// Non-whitespace characters inside anchors.
    link_chars: usize,
    /// Holds an `h1` or a main-content landmark.
    landmark: bool,
}

impl Subtree {
    fn absorb(&mut self, other: &Subtree) {
        self.chars += other.chars;
        self.links += other.links;
        self.link_chars += other.link_chars;
        self.landmark |= other.landmark;
    }
}

/// Chrome classifier for one document.
///
/// Subtree totals are gathered in a single bottom-up pass, so each check is
/// proportional to the element's child count however deep the markup nests.
pub(crate) struct ChromeIndex {
    subtrees: HashMap<NodeId, Subtree>,
}

impl ChromeIndex {
    pub(crate) fn scan(root: ElementRef) -> Self {
        let order: Vec<_> = root.descendants().collect();
        let mut subtrees: HashMap<NodeId, Subtree> = HashMap::with_capacity(order.len());

        // Reverse pre-order visits every child before its parent.
        for node in order.into_iter().rev() {
            let mut totals = Subtree::default();
            match node.value() {
                Node::Text(text) => totals.chars = non_whitespace_len(text),
                Node::Element(element) => {
                    for child in node.children() {
                        if let Some(child_totals) = subtrees.get(&child.id()) {
                            totals.absorb(child_totals);
                        }
                    }
                    if element.name() == "a" {
                        totals.links += 1;
                        totals.link_chars += totals.chars;
                    }
                    if ElementRef::wrap(node).is_some_and(|el| LANDMARK_SEL.matches(&el)) {
                        totals.landmark = true;
                    }
                }
                _ => continue,
            }
            subtrees.insert(node.id(), totals);
        }

        Self { subtrees }
    }

    /// Whether `el` (and everything below it) should be skipped.
    ///
    /// `in_content` is true inside `<main>`/`<article>`, where `<header>` and
    /// `<footer>` belong to the content rather than the site chrome.
    pub(crate) fn is_boilerplate(&self, el: &ElementRef, in_content: bool) -> bool {
        let name = el.value().name();

        if SKIP_TAGS.contains(&name) {
            return true;
        }
        if matches!(name, "header" | "footer") && !in_content {
            return true;
        }
        if is_hidden(el) {
            return true;
        }
        if let Some(role) = el.value().attr("role") {
            if CHROME_ROLES.contains(&role.trim().to_ascii_lowercase().as_str()) {
                return true;
            }
        }

        let below = self.below(el);
        if matches!(name, "html" | "body" | "main" | "article") || below.landmark {
            return false;
        }

        has_chrome_name(el) || is_link_dense(name, &below)
    }

    /// Totals over the descendants of `el`, excluding `el` itself.
    fn below(&self, el: &ElementRef) -> Subtree {
        let mut totals = Subtree::default();
        for child in el.children() {
            if let Some(child_totals) = self.subtrees.get(&child.id()) {
                totals.absorb(child_totals);
            }
        }
        totals
    }
}

fn is_hidden(el: &ElementRef) -> bool {
    let value = el.value();
    if value.attr("hidden").is_some() {
        return true;
    }
    if value
        .attr("aria-hidden")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    {
        return true;
    }
    value.attr("style").is_some_and(|style| {
        let compact: String = style
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        compact.contains("display:none") || compact.contains("visibility:hidden")
    })
}

fn has_chrome_name(el: &ElementRef) -> bool {
    let value = el.value();
    let names = value
        .attr("id")
        .into_iter()
        .chain(value.classes())
        .map(str::to_ascii_lowercase);

    for name in names {
        let whole = CHROME_TOKENS.contains(&name.as_str());
        let prefixed_or_suffixed = CHROME_TOKENS.iter().any(|token| {
            name.starts_with(&format!("{token}-"))
                || name.starts_with(&format!("{token}_"))
                || name.ends_with(&format!("-{token}"))
                || name.ends_with(&format!("_{token}"))
        });
        if whole || prefixed_or_suffixed {
            return true;
        }
    }
    false
}

/// Containers whose text is mostly anchor text (menus, link farms).
fn is_link_dense(name: &str, below: &Subtree) -> bool {
    if !matches!(name, "div" | "ul" | "ol" | "section" | "p" | "span") {
        return false;
    }
    if below.links < LINK_DENSITY_MIN_LINKS {
        return false;
    }
    below.chars > 0 && below.link_chars * 10 >= below.chars * 8
}

fn non_whitespace_len(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}
