//! HTML-to-content-block extraction.
//!
//! Walks the parsed DOM of each fetched page, skips boilerplate (see
//! [`boilerplate`]), and emits whitespace-normalized [`ContentBlock`]s typed by
//! structural role. Extraction is a pure function of the page HTML, and runs
//! in constant stack space however deeply the markup nests.

mod boilerplate;
mod contact;

use std::collections::HashSet;
use std::sync::LazyLock;

use ego_tree::NodeRef;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use portfolio_shared::{BlockKind, ContentBlock, FetchedPage, PortfolioError, Result};

use crate::boilerplate::ChromeIndex;

pub use contact::{company_hint, extract_contact};

static BODY_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("valid selector"));

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Extract the content blocks of one page.
///
/// Blocks carry `page_index` and their position within the page. Blocks
/// repeating earlier text on the same page are dropped.
#[instrument(skip(page), fields(url = %page.url))]
pub fn extract(page_index: usize, page: &FetchedPage) -> Vec<ContentBlock> {
    let doc = Html::parse_document(&page.body);
    let root = doc
        .select(&BODY_SEL)
        .next()
        .unwrap_or_else(|| doc.root_element());

    let chrome = ChromeIndex::scan(root);
    let mut walker = Walker::new(page_index, &page.url, &chrome);
    walker.walk(root);
    walker.flush_inline();

    let blocks = dedup_blocks(walker.blocks);
    debug!(blocks = blocks.len(), "page extracted");
    blocks
}

/// Extract every page in fetch order and drop blocks whose text already
/// appeared on an earlier page.
///
/// Fails with `ExtractionError{EmptyContent}` when no block survives, which is
/// also how client-side-rendered sites surface.
#[instrument(skip_all, fields(pages = pages.len()))]
pub fn extract_all(pages: &[FetchedPage]) -> Result<Vec<ContentBlock>> {
    let blocks: Vec<ContentBlock> = pages
        .iter()
        .enumerate()
        .flat_map(|(index, page)| extract(index, page))
        .collect();

    let blocks = dedup_blocks(blocks);
    if blocks.is_empty() {
        return Err(PortfolioError::empty_content(format!(
            "no readable text found on {} page(s)",
            pages.len()
        )));
    }

    debug!(blocks = blocks.len(), "extraction complete");
    Ok(blocks)
}

/// Keep the first block for each distinct text. Positions are untouched.
pub fn dedup_blocks(blocks: Vec<ContentBlock>) -> Vec<ContentBlock> {
    let mut seen = HashSet::new();
    blocks
        .into_iter()
        .filter(|block| seen.insert(block.text.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// DOM walk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Heading(u8),
    Paragraph,
    ListItem,
    /// Text flows into the surrounding run.
    Inline,
    /// Line break inside a run.
    Break,
    /// Ends the current run and contributes no text.
    Void,
    Container,
}

fn role(tag: &str) -> Role {
    match tag {
        "h1" => Role::Heading(1),
        "h2" => Role::Heading(2),
        "h3" => Role::Heading(3),
        "h4" => Role::Heading(4),
        "h5" => Role::Heading(5),
        "h6" => Role::Heading(6),
        "p" | "blockquote" | "figcaption" | "caption" | "dd" | "dt" | "td" | "th" | "pre"
        | "address" | "summary" => Role::Paragraph,
        "li" => Role::ListItem,
        "a" | "abbr" | "b" | "bdi" | "bdo" | "cite" | "code" | "data" | "dfn" | "em" | "font"
        | "i" | "kbd" | "label" | "mark" | "q" | "s" | "samp" | "small" | "span" | "strong"
        | "sub" | "sup" | "time" | "u" | "var" => Role::Inline,
        "br" | "wbr" => Role::Break,
        "hr" | "img" | "input" | "textarea" | "meta" | "link" | "area" | "source" | "track"
        | "head" | "title" | "base" => Role::Void,
        _ => Role::Container,
    }
}

fn enters_content(tag: &str) -> bool {
    matches!(tag, "main" | "article")
}

/// Pending work for the DOM walk. The walk keeps its own stack so markup
/// depth never turns into call depth.
enum Step<'a> {
    /// A child node of an element being walked, with its content flag.
    Visit(NodeRef<'a, Node>, bool),
    /// A container ended: close the pending run of loose text.
    Flush,
}

struct Walker<'a> {
    page_index: usize,
    page_url: &'a Url,
    chrome: &'a ChromeIndex,
    blocks: Vec<ContentBlock>,
    /// Loose text collected between block-level elements.
    inline: String,
}

impl<'a> Walker<'a> {
    fn new(page_index: usize, page_url: &'a Url, chrome: &'a ChromeIndex) -> Self {
        Self {
            page_index,
            page_url,
            chrome,
            blocks: Vec::new(),
            inline: String::new(),
        }
    }

    fn emit(&mut self, kind: BlockKind, text: &str) {
        let position = self.blocks.len();
        if let Some(block) =
            ContentBlock::new(self.page_index, self.page_url.clone(), kind, text, position)
        {
            self.blocks.push(block);
        }
    }

    /// Emit pending loose text as a paragraph.
    fn flush_inline(&mut self) {
        let text = std::mem::take(&mut self.inline);
        self.emit(BlockKind::Paragraph, &text);
    }

    fn walk<'d>(&mut self, root: ElementRef<'d>) {
        let mut stack = Vec::new();
        push_children(&mut stack, root, false);

        while let Some(step) = stack.pop() {
            match step {
                Step::Flush => self.flush_inline(),
                Step::Visit(node, in_content) => match node.value() {
                    Node::Text(text) => self.inline.push_str(text),
                    Node::Element(_) => {
                        if let Some(el) = ElementRef::wrap(node) {
                            self.visit_element(el, in_content, &mut stack);
                        }
                    }
                    _ => {}
                },
            }
        }
    }

    fn visit_element<'d>(&mut self, el: ElementRef<'d>, in_content: bool, stack: &mut Vec<Step<'d>>) {
        if self.chrome.is_boilerplate(&el, in_content) {
            return;
        }

        let tag = el.value().name();
        match role(tag) {
            Role::Inline => push_children(stack, el, in_content),
            Role::Break => self.inline.push(' '),
            Role::Void => self.flush_inline(),
            Role::Heading(level) => {
                self.flush_inline();
                let text = block_text(self.chrome, el, in_content, &mut Vec::new());
                self.emit(BlockKind::Heading { level }, &text);
            }
            Role::Paragraph => {
                self.flush_inline();
                let text = block_text(self.chrome, el, in_content, &mut Vec::new());
                self.emit(BlockKind::Paragraph, &text);
            }
            Role::ListItem => {
                self.flush_inline();
                let mut nested = Vec::new();
                let text = block_text(self.chrome, el, in_content, &mut nested);
                self.emit(BlockKind::ListItem, &text);
                // Nested lists follow their item, ahead of its siblings.
                stack.extend(nested.into_iter().rev().map(|list| Step::Visit(*list, in_content)));
            }
            Role::Container => {
                self.flush_inline();
                stack.push(Step::Flush);
                push_children(stack, el, in_content || enters_content(tag));
            }
        }
    }
}

/// Queue the children of `el` so they pop in document order.
fn push_children<'d>(stack: &mut Vec<Step<'d>>, el: ElementRef<'d>, in_content: bool) {
    stack.extend(el.children().rev().map(|child| Step::Visit(child, in_content)));
}

enum Piece<'a> {
    Visit(NodeRef<'a, Node>),
    Space,
}

/// All non-boilerplate text below `el`. Nested `ul`/`ol` are not included
/// but handed back through `nested` so their items become blocks of their own.
fn block_text<'d>(
    chrome: &ChromeIndex,
    el: ElementRef<'d>,
    in_content: bool,
    nested: &mut Vec<ElementRef<'d>>,
) -> String {
    let mut out = String::new();
    let mut stack: Vec<Piece<'d>> = el.children().rev().map(Piece::Visit).collect();

    while let Some(piece) = stack.pop() {
        let node = match piece {
            Piece::Space => {
                out.push(' ');
                continue;
            }
            Piece::Visit(node) => node,
        };
        if let Some(text) = node.value().as_text() {
            out.push_str(text);
            continue;
        }
        let Some(child) = ElementRef::wrap(node) else {
            continue;
        };
        if chrome.is_boilerplate(&child, in_content) {
            continue;
        }
        let tag = child.value().name();
        if matches!(tag, "ul" | "ol") {
            nested.push(child);
            continue;
        }
        match role(tag) {
            Role::Inline => stack.extend(node.children().rev().map(Piece::Visit)),
            Role::Void => {}
            // Block-level children must not glue words together.
            _ => {
                out.push(' ');
                stack.push(Piece::Space);
                stack.extend(node.children().rev().map(Piece::Visit));
            }
        }
    }
    out
}
