//! Language-model synthesis of the portfolio.
//!
//! The engine renders the selected blocks into a single prompt, asks the
//! injected [`LanguageModel`] for a JSON object, and validates the reply.
//! Rejected replies are retried with a corrective instruction up to the
//! configured bound.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use portfolio_shared::{
    BlockKind, Clock, ContactInfo, ContentBlock, ErrorKind, PortfolioError, PortfolioResult,
    RankedBlock, Result,
};

/// Shape the model is asked to return.
pub const PORTFOLIO_SCHEMA_HINT: &str = r#"{"company_name": string, "summary": string, "offerings": [string, ...], "highlights": [string, ...], "industry": string | null, "tagline": string | null, "technology_stack": [string, ...] | null, "leadership": [string, ...] | null}"#;

pub const DEFAULT_SYNTHESIS_RETRIES: u32 = 2;
pub const DEFAULT_MAX_SUMMARY_CHARS: usize = 1200;

// ---------------------------------------------------------------------------
// Collaborator
// ---------------------------------------------------------------------------

/// A text-completion capability.
///
/// Implementations return the raw completion text. Failing to reach the model
/// at all is an error; a reply that does not parse is not.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str, schema_hint: &str) -> Result<String>;
}

/// Company identity handed to the engine alongside the blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyHint {
    /// Best guess at the company name, from page metadata or the host.
    pub name: String,
    /// Normalized source URL, used as grounding and copied to the result.
    pub source_url: String,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Drives prompt construction, the model call, and reply validation.
pub struct SynthesisEngine {
    model: Arc<dyn LanguageModel>,
    clock: Arc<dyn Clock>,
    retries: u32,
    max_summary_chars: usize,
}

impl SynthesisEngine {
    pub fn new(model: Arc<dyn LanguageModel>, clock: Arc<dyn Clock>) -> Self {
        Self {
            model,
            clock,
            retries: DEFAULT_SYNTHESIS_RETRIES,
            max_summary_chars: DEFAULT_MAX_SUMMARY_CHARS,
        }
    }

    /// Retries after the first attempt; total attempts are `retries + 1`.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_max_summary_chars(mut self, max: usize) -> Self {
        self.max_summary_chars = max;
        self
    }

    /// Produce a validated [`PortfolioResult`] from the included blocks.
    ///
    /// Contact details are left empty. Fails with `SchemaInvalid` once every
    /// attempt has been rejected, or `ModelUnavailable` as soon as the model
    /// call itself fails.
    #[instrument(skip_all, fields(company = %hint.name, blocks = ranked.len()))]
    pub async fn synthesize(
        &self,
        ranked: &[RankedBlock],
        hint: &CompanyHint,
    ) -> Result<PortfolioResult> {
        let base_prompt = build_prompt(ranked, hint, self.max_summary_chars);
        let attempts = self.retries.saturating_add(1);
        let mut rejection = String::new();

        for attempt in 1..=attempts {
            let prompt = if attempt == 1 {
                base_prompt.clone()
            } else {
                corrective_prompt(&base_prompt, &rejection)
            };

            debug!(attempt, attempts, prompt_chars = prompt.len(), "calling language model");
            let reply = self
                .model
                .complete(&prompt, PORTFOLIO_SCHEMA_HINT)
                .await
                .map_err(as_model_unavailable)?;

            match parse_reply(&reply, self.max_summary_chars) {
                Ok(draft) => {
                    info!(attempt, "portfolio synthesized");
                    return Ok(draft.into_result(hint, self.clock.now()));
                }
                Err(reason) => {
                    warn!(attempt, attempts, %reason, "model reply rejected");
                    rejection = reason;
                }
            }
        }

        Err(PortfolioError::schema_invalid(format!(
            "no valid reply after {attempts} attempt(s); last rejection: {rejection}"
        )))
    }
}

fn as_model_unavailable(err: PortfolioError) -> PortfolioError {
    match err.kind() {
        ErrorKind::Synthesis(_) => err,
        _ => PortfolioError::model_unavailable(err.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

/// Render the instruction, grounding URL, and included blocks.
///
/// Blocks appear in reading order: pages in fetch order, blocks by position.
pub fn build_prompt(ranked: &[RankedBlock], hint: &CompanyHint, max_summary_chars: usize) -> String {
    let mut included: Vec<&ContentBlock> = ranked
        .iter()
        .filter(|r| r.included)
        .map(|r| &r.block)
        .collect();
    included.sort_by_key(|b| (b.page_index, b.position));

    let mut prompt = format!(
        "You write concise company portfolios from website content.\n\
         Respond with a single JSON object and nothing else, matching this schema:\n\
         {PORTFOLIO_SCHEMA_HINT}\n\
         \n\
         Rules:\n\
         - company_name: the company's name. The site suggests \"{name}\".\n\
         - summary: a neutral overview of at most {max_summary_chars} characters.\n\
         - offerings: the products or services offered, at least one entry.\n\
         - highlights: notable facts such as history, clients, or scale, at least one entry.\n\
         - industry and tagline: short strings, or null when the content does not say.\n\
         - technology_stack: technologies, platforms, or tools the company names, or null.\n\
         - leadership: named leaders as \"Name, Role\", or null when none are named.\n\
         - Use only facts stated in the content below.\n\
         \n\
         Source URL: {url}\n\
         \n\
         Content:\n",
        name = hint.name,
        url = hint.source_url,
    );

    let mut current_page = None;
    for block in included {
        if current_page != Some(block.page_index) {
            current_page = Some(block.page_index);
            let _ = writeln!(prompt, "\n[page {}: {}]", block.page_index + 1, block.page_url);
        }
        let _ = match block.kind {
            BlockKind::Heading { level } => {
                writeln!(prompt, "{} {}", "#".repeat(usize::from(level)), block.text)
            }
            BlockKind::Paragraph => writeln!(prompt, "{}", block.text),
            BlockKind::ListItem => writeln!(prompt, "- {}", block.text),
        };
    }

    prompt
}

fn corrective_prompt(base: &str, rejection: &str) -> String {
    format!(
        "{base}\n\
         Your previous reply was rejected: {rejection}\n\
         Reply again with ONLY the JSON object. No markdown fences, no commentary. \
         Every required field must be present, offerings and highlights must be \
         non-empty lists of non-empty strings."
    )
}

// ---------------------------------------------------------------------------
// Reply validation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PortfolioDraft {
    company_name: String,
    summary: String,
    offerings: Vec<String>,
    highlights: Vec<String>,
    #[serde(default)]
    industry: Option<String>,
    #[serde(default)]
    tagline: Option<String>,
    #[serde(default)]
    technology_stack: Option<Vec<String>>,
    #[serde(default)]
    leadership: Option<Vec<String>>,
}

impl PortfolioDraft {
    fn into_result(
        self,
        hint: &CompanyHint,
        generated_at: chrono::DateTime<chrono::Utc>,
    ) -> PortfolioResult {
        PortfolioResult {
            company_name: self.company_name,
            summary: self.summary,
            offerings: self.offerings,
            highlights: self.highlights,
            industry: self.industry,
            tagline: self.tagline,
            technology_stack: self.technology_stack.unwrap_or_default(),
            leadership: self.leadership.unwrap_or_default(),
            contact: ContactInfo::default(),
            source_url: hint.source_url.clone(),
            generated_at,
        }
    }
}

/// Parse and validate a model reply. The error is the rejection reason fed
/// back to the model.
fn parse_reply(reply: &str, max_summary_chars: usize) -> std::result::Result<PortfolioDraft, String> {
    let json = json_object(reply).ok_or_else(|| "reply contains no JSON object".to_string())?;
    let draft: PortfolioDraft =
        serde_json::from_str(json).map_err(|e| format!("reply is not valid JSON for the schema: {e}"))?;
    validate(draft, max_summary_chars)
}

/// The outermost `{...}` span, ignoring code fences and surrounding prose.
fn json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

fn validate(draft: PortfolioDraft, max_summary_chars: usize) -> std::result::Result<PortfolioDraft, String> {
    let company_name = draft.company_name.trim().to_string();
    if company_name.is_empty() {
        return Err("company_name is empty".into());
    }

    let summary = draft.summary.trim().to_string();
    if summary.is_empty() {
        return Err("summary is empty".into());
    }
    let summary_chars = summary.chars().count();
    if summary_chars > max_summary_chars {
        return Err(format!(
            "summary has {summary_chars} characters, the limit is {max_summary_chars}"
        ));
    }

    let offerings = non_empty_list("offerings", draft.offerings)?;
    let highlights = non_empty_list("highlights", draft.highlights)?;

    Ok(PortfolioDraft {
        company_name,
        summary,
        offerings,
        highlights,
        industry: optional_text(draft.industry),
        tagline: optional_text(draft.tagline),
        technology_stack: optional_list(draft.technology_stack),
        leadership: optional_list(draft.leadership),
    })
}

fn non_empty_list(field: &str, items: Vec<String>) -> std::result::Result<Vec<String>, String> {
    if items.is_empty() {
        return Err(format!("{field} must contain at least one entry"));
    }
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let item = item.trim().to_string();
            if item.is_empty() {
                Err(format!("{field}[{i}] is an empty string"))
            } else {
                Ok(item)
            }
        })
        .collect()
}

/// Optional lists drop blank entries instead of rejecting the reply.
fn optional_list(items: Option<Vec<String>>) -> Option<Vec<String>> {
    items.map(|items| {
        items
            .into_iter()
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    })
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;
    use chrono::{TimeZone, Utc};
    use portfolio_shared::{FixedClock, SynthesisErrorKind};
    use url::Url;

    const VALID: &str = r#"{
        "company_name": "Acme Anvils",
        "summary": "Acme forges industrial anvils.",
        "offerings": ["Anvils", " Repairs "],
        "highlights": ["Founded in 1949"],
        "industry": "Manufacturing",
        "tagline": ""
    }"#;

    fn ranked() -> Vec<RankedBlock> {
        let url = Url::parse("https://acme.test/").unwrap();
        let about = Url::parse("https://acme.test/about").unwrap();
        let blocks = [
            (1, about.clone(), BlockKind::Paragraph, "Founded in 1949.", 1, true),
            (0, url.clone(), BlockKind::Paragraph, "We forge anvils.", 1, true),
            (0, url.clone(), BlockKind::Heading { level: 1 }, "Acme", 0, true),
            (0, url.clone(), BlockKind::ListItem, "Cookie text", 2, false),
            (1, about, BlockKind::ListItem, "Repairs", 0, true),
        ];
        blocks
            .into_iter()
            .map(|(page, url, kind, text, pos, included)| RankedBlock {
                block: ContentBlock::new(page, url, kind, text, pos).unwrap(),
                score: 0.5,
                included,
            })
            .collect()
    }

    fn hint() -> CompanyHint {
        CompanyHint {
            name: "Acme".into(),
            source_url: "https://acme.test/".into(),
        }
    }

    fn engine(model: Arc<ScriptedModel>) -> SynthesisEngine {
        let clock = FixedClock(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap());
        SynthesisEngine::new(model, Arc::new(clock))
    }

    #[test]
    fn prompt_orders_blocks_by_page_then_position() {
        let prompt = build_prompt(&ranked(), &hint(), 500);
        let acme = prompt.find("# Acme").unwrap();
        let forge = prompt.find("We forge anvils.").unwrap();
        let repairs = prompt.find("- Repairs").unwrap();
        let founded = prompt.find("Founded in 1949.").unwrap();
        assert!(acme < forge && forge < repairs && repairs < founded);
        assert!(prompt.contains("[page 2: https://acme.test/about]"));
        assert!(prompt.contains("Source URL: https://acme.test/"));
        assert!(prompt.contains("at most 500 characters"));
        assert!(!prompt.contains("Cookie text"));
    }

    #[test]
    fn json_object_tolerates_fences_and_prose() {
        let reply = "Sure! Here it is:\n```json\n{\"a\": {\"b\": 1}}\n```\nAnything else?";
        assert_eq!(json_object(reply), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(json_object("no json here"), None);
    }

    #[test]
    fn validation_rejects_schema_violations() {
        let long = format!(
            r#"{{"company_name":"A","summary":"{}","offerings":["x"],"highlights":["y"]}}"#,
            "s".repeat(20)
        );
        assert!(parse_reply(&long, 10).unwrap_err().contains("limit is 10"));

        let empty_list = r#"{"company_name":"A","summary":"S","offerings":[],"highlights":["y"]}"#;
        assert!(parse_reply(empty_list, 100).unwrap_err().contains("offerings"));

        let blank_item = r#"{"company_name":"A","summary":"S","offerings":["x"],"highlights":["  "]}"#;
        assert!(parse_reply(blank_item, 100).unwrap_err().contains("highlights[0]"));

        let missing = r#"{"company_name":"A","offerings":["x"],"highlights":["y"]}"#;
        assert!(parse_reply(missing, 100).unwrap_err().contains("summary"));
    }

    #[tokio::test]
    async fn valid_reply_is_normalized() {
        let model = Arc::new(ScriptedModel::new().with_reply(VALID));
        let result = engine(model.clone())
            .synthesize(&ranked(), &hint())
            .await
            .expect("portfolio");

        assert_eq!(result.company_name, "Acme Anvils");
        assert_eq!(result.offerings, vec!["Anvils", "Repairs"]);
        assert_eq!(result.industry.as_deref(), Some("Manufacturing"));
        assert_eq!(result.tagline, None);
        assert_eq!(result.source_url, "https://acme.test/");
        assert!(result.contact.is_empty());
        assert_eq!(model.attempts(), 1);
    }

    #[tokio::test]
    async fn retries_with_corrective_prompt() {
        let model = Arc::new(
            ScriptedModel::new()
                .with_reply("I cannot help with that")
                .with_reply(VALID),
        );
        let result = engine(model.clone()).synthesize(&ranked(), &hint()).await;

        assert!(result.is_ok());
        assert_eq!(model.attempts(), 2);
        let prompts = model.prompts();
        assert!(!prompts[0].contains("previous reply was rejected"));
        assert!(prompts[1].contains("previous reply was rejected: reply contains no JSON object"));
    }

    #[tokio::test]
    async fn exhausting_retries_is_schema_invalid() {
        let model = Arc::new(ScriptedModel::new().repeating("{not json"));
        let err = engine(model.clone())
            .with_retries(3)
            .synthesize(&ranked(), &hint())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Synthesis(SynthesisErrorKind::SchemaInvalid));
        assert_eq!(model.attempts(), 4);
    }

    #[tokio::test]
    async fn model_failure_is_not_retried() {
        let model = Arc::new(
            ScriptedModel::new()
                .with_failure("upstream 503")
                .with_reply(VALID),
        );
        let err = engine(model.clone())
            .synthesize(&ranked(), &hint())
            .await
            .unwrap_err();

        assert_eq!(
            err.kind(),
            ErrorKind::Synthesis(SynthesisErrorKind::ModelUnavailable)
        );
        assert_eq!(model.attempts(), 1);
    }

    #[tokio::test]
    async fn identical_inputs_give_identical_results() {
        let run = || async {
            let model = Arc::new(ScriptedModel::new().with_reply(VALID));
            let result = engine(model).synthesize(&ranked(), &hint()).await.unwrap();
            serde_json::to_string(&result).unwrap()
        };
        assert_eq!(run().await, run().await);
    }

    #[tokio::test]
    async fn optional_lists_drop_blank_entries() {
        let reply = r#"{"company_name":"Acme","summary":"Acme forges anvils.",
            "offerings":["Anvils"],"highlights":["Since 1949"],
            "technology_stack":[" Rust ", "", "  "],"leadership":null}"#;
        let model = Arc::new(ScriptedModel::new().with_reply(reply));
        let result = engine(model.clone())
            .synthesize(&ranked(), &hint())
            .await
            .expect("portfolio");

        assert_eq!(result.technology_stack, vec!["Rust"]);
        assert!(result.leadership.is_empty());
        assert_eq!(model.attempts(), 1);
    }

    #[tokio::test]
    async fn maximal_retry_count_does_not_overflow() {
        let model = Arc::new(ScriptedModel::new().with_reply(VALID));
        let result = engine(model.clone())
            .with_retries(u32::MAX)
            .synthesize(&ranked(), &hint())
            .await;

        assert!(result.is_ok());
        assert_eq!(model.attempts(), 1);
    }
}
