//! Application configuration for the portfolio pipeline.
//!
//! User config lives at `~/.portfolio/portfolio.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PortfolioError, Result};
use crate::types::Stage;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "portfolio.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".portfolio";

// ---------------------------------------------------------------------------
// Config structs (matching portfolio.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pipeline limits and budgets.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Language model endpoint settings.
    #[serde(default)]
    pub llm: LlmConfig,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Secondary same-site pages fetched besides the entry page.
    #[serde(default = "default_max_secondary_pages")]
    pub max_secondary_pages: usize,

    /// Character budget for the text handed to the model.
    #[serde(default = "default_content_budget_chars")]
    pub content_budget_chars: usize,

    /// Corrective retries after a schema-invalid model response.
    #[serde(default = "default_synthesis_retries")]
    pub synthesis_retries: u32,

    /// Maximum accepted length of the generated summary.
    #[serde(default = "default_max_summary_chars")]
    pub max_summary_chars: usize,

    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Redirect hops followed before failing.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Allow loopback/private hosts (local testing only).
    #[serde(default)]
    pub allow_private_hosts: bool,

    /// Per-stage time budgets.
    #[serde(default)]
    pub stage_timeouts: StageTimeoutsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_secondary_pages: default_max_secondary_pages(),
            content_budget_chars: default_content_budget_chars(),
            synthesis_retries: default_synthesis_retries(),
            max_summary_chars: default_max_summary_chars(),
            request_timeout_ms: default_request_timeout_ms(),
            max_redirects: default_max_redirects(),
            allow_private_hosts: false,
            stage_timeouts: StageTimeoutsConfig::default(),
        }
    }
}

fn default_max_secondary_pages() -> usize {
    3
}
fn default_content_budget_chars() -> usize {
    8000
}
fn default_synthesis_retries() -> u32 {
    2
}
fn default_max_summary_chars() -> usize {
    1200
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_max_redirects() -> usize {
    5
}

/// `[pipeline.stage_timeouts]` section, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTimeoutsConfig {
    #[serde(default = "default_fetch_ms")]
    pub fetch_ms: u64,
    #[serde(default = "default_extract_ms")]
    pub extract_ms: u64,
    #[serde(default = "default_select_ms")]
    pub select_ms: u64,
    #[serde(default = "default_synthesize_ms")]
    pub synthesize_ms: u64,
}

impl Default for StageTimeoutsConfig {
    fn default() -> Self {
        Self {
            fetch_ms: default_fetch_ms(),
            extract_ms: default_extract_ms(),
            select_ms: default_select_ms(),
            synthesize_ms: default_synthesize_ms(),
        }
    }
}

fn default_fetch_ms() -> u64 {
    20_000
}
fn default_extract_ms() -> u64 {
    5_000
}
fn default_select_ms() -> u64 {
    2_000
}
fn default_synthesize_ms() -> u64 {
    90_000
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model identifier sent to the endpoint.
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of an OpenAI-compatible chat completions API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: default_model(),
            base_url: default_base_url(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_max_tokens() -> u32 {
    1500
}

// ---------------------------------------------------------------------------
// Pipeline options (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Independent time budgets for each stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub fetch: Duration,
    pub extract: Duration,
    pub select: Duration,
    pub synthesize: Duration,
}

impl StageTimeouts {
    /// Budget for one stage.
    pub fn for_stage(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Fetch => self.fetch,
            Stage::Extract => self.extract,
            Stage::Select => self.select,
            Stage::Synthesize => self.synthesize,
        }
    }

    /// The overall run budget: the sum of all stage budgets.
    pub fn total(&self) -> Duration {
        self.fetch + self.extract + self.select + self.synthesize
    }
}

impl From<&StageTimeoutsConfig> for StageTimeouts {
    fn from(config: &StageTimeoutsConfig) -> Self {
        Self {
            fetch: Duration::from_millis(config.fetch_ms),
            extract: Duration::from_millis(config.extract_ms),
            select: Duration::from_millis(config.select_ms),
            synthesize: Duration::from_millis(config.synthesize_ms),
        }
    }
}

/// Runtime options for one `generate_portfolio` call.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_secondary_pages: usize,
    pub content_budget_chars: usize,
    pub synthesis_retries: u32,
    pub max_summary_chars: usize,
    pub request_timeout: Duration,
    pub max_redirects: usize,
    pub allow_private_hosts: bool,
    pub stage_timeouts: StageTimeouts,
}

impl From<&AppConfig> for PipelineOptions {
    fn from(config: &AppConfig) -> Self {
        let p = &config.pipeline;
        Self {
            max_secondary_pages: p.max_secondary_pages,
            content_budget_chars: p.content_budget_chars,
            synthesis_retries: p.synthesis_retries,
            max_summary_chars: p.max_summary_chars,
            request_timeout: Duration::from_millis(p.request_timeout_ms),
            max_redirects: p.max_redirects,
            allow_private_hosts: p.allow_private_hosts,
            stage_timeouts: StageTimeouts::from(&p.stage_timeouts),
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.portfolio/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PortfolioError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.portfolio/portfolio.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PortfolioError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| PortfolioError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PortfolioError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PortfolioError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PortfolioError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the model API key from the configured env var.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(PortfolioError::config(format!(
            "language model API key not found. Set the {var_name} environment variable."
        ))),
    }
}
