//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use portfolio_core::{
    Collaborators, OpenAiCompatibleModel, ProgressReporter, generate_portfolio_with_progress,
};
use portfolio_crawler::ReqwestHttpClient;
use portfolio_shared::{
    AppConfig, PipelineOptions, PipelineOutcome, PipelineState, SystemClock, init_config,
    load_config, validate_api_key,
};

use crate::render::render_text;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Portfolio: build a company profile from its website.
#[derive(Parser)]
#[command(
    name = "portfolio",
    version,
    about = "Generate a structured company portfolio from a website URL.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Portfolio output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    Json,
    Text,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Generate a portfolio for a company website.
    Generate {
        /// Company website URL (scheme optional).
        url: String,

        /// Number of same-site pages to fetch besides the entry page.
        #[arg(long)]
        max_secondary_pages: Option<usize>,

        /// Character budget for the content sent to the model.
        #[arg(long)]
        budget: Option<usize>,

        /// Corrective retries after a rejected model reply.
        #[arg(long)]
        retries: Option<u32>,

        /// Model identifier, overriding the config file.
        #[arg(long)]
        model: Option<String>,

        /// Output format.
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Write the result to a file instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

/// Flag overrides applied on top of the config file.
#[derive(Debug, Default)]
pub(crate) struct Overrides {
    pub max_secondary_pages: Option<usize>,
    pub budget: Option<usize>,
    pub retries: Option<u32>,
    pub model: Option<String>,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so stdout stays
/// clean for the portfolio itself.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "portfolio=info",
        1 => "portfolio=debug",
        _ => "portfolio=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Generate {
            url,
            max_secondary_pages,
            budget,
            retries,
            model,
            format,
            out,
        } => {
            let overrides = Overrides {
                max_secondary_pages,
                budget,
                retries,
                model,
            };
            cmd_generate(&url, overrides, format, out).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_generate(
    url: &str,
    overrides: Overrides,
    format: OutputFormat,
    out: Option<PathBuf>,
) -> Result<()> {
    let mut config = load_config()?;
    if let Some(model) = &overrides.model {
        config.llm.model.clone_from(model);
    }
    let api_key = validate_api_key(&config)?;
    let options = pipeline_options(&config, &overrides);

    let model = OpenAiCompatibleModel::new(api_key, &config.llm)?;
    info!(
        url,
        model = model.model(),
        max_secondary_pages = options.max_secondary_pages,
        budget = options.content_budget_chars,
        "generating portfolio"
    );

    let collaborators = Collaborators::new(
        Arc::new(ReqwestHttpClient::new()?),
        Arc::new(model),
        Arc::new(SystemClock),
    );

    let reporter = CliProgress::new();
    let outcome = generate_portfolio_with_progress(url, &options, &collaborators, &reporter).await;

    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&outcome)?,
        OutputFormat::Text => render_text(&outcome),
    };

    match &out {
        Some(path) => {
            std::fs::write(path, format!("{rendered}\n"))
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            eprintln!("Portfolio written to {}", path.display());
        }
        None => println!("{rendered}"),
    }

    match outcome {
        PipelineOutcome::Failure { kind, message } => Err(eyre!("{kind}: {message}")),
        _ => Ok(()),
    }
}

/// Config values with flag overrides applied.
pub(crate) fn pipeline_options(config: &AppConfig, overrides: &Overrides) -> PipelineOptions {
    let mut options = PipelineOptions::from(config);
    if let Some(n) = overrides.max_secondary_pages {
        options.max_secondary_pages = n;
    }
    if let Some(budget) = overrides.budget {
        options.content_budget_chars = budget;
    }
    if let Some(retries) = overrides.retries {
        options.synthesis_retries = retries;
    }
    options
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("valid spinner template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, state: PipelineState) {
        let message = match state {
            PipelineState::Fetching => "Fetching pages",
            PipelineState::Extracting => "Extracting content",
            PipelineState::Selecting => "Selecting relevant content",
            PipelineState::Synthesizing => "Writing portfolio",
            PipelineState::Done => "Done",
            PipelineState::Failed => "Failed",
        };
        self.spinner.set_message(message);
    }

    fn page_fetched(&self, url: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Fetched [{current}/{total}] {url}"));
    }

    fn done(&self, _outcome: &PipelineOutcome) {
        self.spinner.finish_and_clear();
    }
}
