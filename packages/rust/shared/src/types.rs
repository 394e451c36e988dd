//! Core domain types for a single pipeline run.
//!
//! Every artifact here is created and consumed within one run: the Fetcher
//! produces [`FetchedPage`]s, the Extractor [`ContentBlock`]s, the Selector
//! [`RankedBlock`]s and the Synthesis Engine a [`PortfolioResult`]. The
//! orchestrator wraps the final artifact in a [`PipelineOutcome`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ErrorKind, PortfolioError, Result};

// ---------------------------------------------------------------------------
// SourceUrl
// ---------------------------------------------------------------------------

/// A validated, normalized absolute http(s) URL.
///
/// Normalization strips the fragment and any non-root trailing slash; the
/// `url` crate already lowercases the host and drops default ports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceUrl(Url);

impl SourceUrl {
    /// Validate and normalize user input. Input without a scheme is treated as `https://`.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(PortfolioError::invalid_url(input, "empty input"));
        }

        let candidate = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };

        let url = Url::parse(&candidate)
            .map_err(|e| PortfolioError::invalid_url(input, e.to_string()))?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(PortfolioError::invalid_url(
                    input,
                    format!("unsupported scheme `{other}`"),
                ));
            }
        }

        if url.host_str().is_none_or(str::is_empty) {
            return Err(PortfolioError::invalid_url(input, "missing host"));
        }

        Ok(Self(normalize_url(&url)))
    }

    /// The normalized URL.
    pub fn as_url(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Host name, always present for a validated URL.
    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or_default()
    }
}

impl fmt::Display for SourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Normalize a URL for comparison and deduplication (strip fragment and non-root trailing slash).
pub fn normalize_url(url: &Url) -> Url {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let path = normalized.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        normalized.set_path(path.trim_end_matches('/'));
    }
    normalized
}

// ---------------------------------------------------------------------------
// Pipeline stages & states
// ---------------------------------------------------------------------------

/// The four pipeline stages, used for budgets, warnings and timeout tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Extract,
    Select,
    Synthesize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Extract => "extract",
            Self::Select => "select",
            Self::Synthesize => "synthesize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator state machine. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Fetching,
    Extracting,
    Selecting,
    Synthesizing,
    Done,
    Failed,
}

impl PipelineState {
    /// The stage being executed in this state, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Fetching => Some(Stage::Fetch),
            Self::Extracting => Some(Stage::Extract),
            Self::Selecting => Some(Stage::Select),
            Self::Synthesizing => Some(Stage::Synthesize),
            Self::Done | Self::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (current, Failed) => !current.is_terminal(),
            (Fetching, Extracting)
            | (Extracting, Selecting)
            | (Selecting, Synthesizing)
            | (Synthesizing, Done) => true,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// FetchedPage
// ---------------------------------------------------------------------------

/// Raw HTML for one crawled page. Index 0 of a fetch is always the entry page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: Url,
    /// HTTP status of the final response.
    pub status: u16,
    /// Response body as text.
    pub body: String,
    /// SHA-256 of the body, hex encoded.
    pub content_hash: String,
    /// When the page was fetched.
    pub fetched_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Content blocks
// ---------------------------------------------------------------------------

/// Structural role of an extracted block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockKind {
    Heading { level: u8 },
    Paragraph,
    ListItem,
}

/// A cleaned unit of page text with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Index of the source page in fetch order.
    pub page_index: usize,
    /// URL of the source page.
    pub page_url: Url,
    pub kind: BlockKind,
    /// Whitespace-normalized, never empty.
    pub text: String,
    /// Position of the block within its page, before deduplication.
    pub position: usize,
}

impl ContentBlock {
    /// Build a block, normalizing whitespace. Returns `None` for blank text.
    pub fn new(
        page_index: usize,
        page_url: Url,
        kind: BlockKind,
        text: &str,
        position: usize,
    ) -> Option<Self> {
        let text = normalize_whitespace(text);
        if text.is_empty() {
            return None;
        }
        Some(Self {
            page_index,
            page_url,
            kind,
            text,
            position,
        })
    }

    /// Length in characters, the unit of the content budget.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Collapse every whitespace run (including blank lines) to a single space and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A content block with its relevance score and inclusion decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedBlock {
    pub block: ContentBlock,
    /// Relevance in `0.0..=1.0`.
    pub score: f64,
    /// Whether the block is part of the synthesis input.
    pub included: bool,
}

// ---------------------------------------------------------------------------
// Portfolio result
// ---------------------------------------------------------------------------

/// Contact details scraped deterministically from the fetched pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phones: Vec<String>,
    /// Postal address lines, as written on the site.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
    /// Network name (`linkedin`, `instagram`, ...) to profile URL.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub socials: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
}

impl ContactInfo {
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
            && self.phones.is_empty()
            && self.addresses.is_empty()
            && self.socials.is_empty()
            && self.logo.is_none()
    }
}

/// The structured portfolio returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioResult {
    pub company_name: String,
    pub summary: String,
    /// Products and services, in model order.
    pub offerings: Vec<String>,
    pub highlights: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagline: Option<String>,
    /// Technologies, platforms and tools the company names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub technology_stack: Vec<String>,
    /// Named leaders, usually "Name, Role".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub leadership: Vec<String>,
    #[serde(default, skip_serializing_if = "ContactInfo::is_empty")]
    pub contact: ContactInfo,
    pub source_url: String,
    pub generated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// A tolerated, non-fatal failure recorded during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageWarning {
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

/// The sole externally visible result of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Success {
        portfolio: PortfolioResult,
    },
    PartialFailure {
        portfolio: PortfolioResult,
        warnings: Vec<StageWarning>,
    },
    Failure {
        kind: ErrorKind,
        message: String,
    },
}

impl PipelineOutcome {
    /// Build a terminal failure from an error.
    pub fn failure(err: &PortfolioError) -> Self {
        Self::Failure {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// `Success` when there are no warnings, `PartialFailure` otherwise.
    pub fn completed(portfolio: PortfolioResult, warnings: Vec<StageWarning>) -> Self {
        if warnings.is_empty() {
            Self::Success { portfolio }
        } else {
            Self::PartialFailure {
                portfolio,
                warnings,
            }
        }
    }

    pub fn portfolio(&self) -> Option<&PortfolioResult> {
        match self {
            Self::Success { portfolio } | Self::PartialFailure { portfolio, .. } => {
                Some(portfolio)
            }
            Self::Failure { .. } => None,
        }
    }

    pub fn warnings(&self) -> &[StageWarning] {
        match self {
            Self::PartialFailure { warnings, .. } => warnings,
            _ => &[],
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of generation timestamps, injected so results can be reproduced.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
