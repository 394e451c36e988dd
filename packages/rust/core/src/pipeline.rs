//! End-to-end portfolio pipeline: URL → fetch → extract → select → synthesize.
//!
//! Stages run strictly in sequence, each under its own time budget, and the
//! whole run under the sum of those budgets. Every run ends in exactly one
//! [`PipelineOutcome`]; errors never escape [`generate_portfolio`].

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, field, info, instrument, warn};
use uuid::Uuid;

use portfolio_crawler::{FetchLimits, Fetcher, HttpClient};
use portfolio_extract::{company_hint, extract_all, extract_contact};
use portfolio_shared::{
    Clock, ContactInfo, PipelineOptions, PipelineOutcome, PipelineState, PortfolioError,
    PortfolioResult, RankedBlock, Result, SourceUrl, Stage, StageTimeouts, StageWarning,
};

use crate::select::select;
use crate::synthesis::{CompanyHint, LanguageModel, SynthesisEngine};

// ---------------------------------------------------------------------------
// Collaborators and progress
// ---------------------------------------------------------------------------

/// Injected capabilities. The pipeline never constructs clients itself.
#[derive(Clone)]
pub struct Collaborators {
    pub http: Arc<dyn HttpClient>,
    pub model: Arc<dyn LanguageModel>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    pub fn new(
        http: Arc<dyn HttpClient>,
        model: Arc<dyn LanguageModel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { http, model, clock }
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called on every state transition, including the terminal one.
    fn stage(&self, state: PipelineState);
    /// Called once per fetched page, entry page first.
    fn page_fetched(&self, url: &str, current: usize, total: usize);
    /// Called with the final outcome.
    fn done(&self, outcome: &PipelineOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _state: PipelineState) {}
    fn page_fetched(&self, _url: &str, _current: usize, _total: usize) {}
    fn done(&self, _outcome: &PipelineOutcome) {}
}

// ---------------------------------------------------------------------------
// State tracking
// ---------------------------------------------------------------------------

/// Forward-only [`PipelineState`] holder.
#[derive(Debug)]
pub struct StageTracker {
    state: PipelineState,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Fetching,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Move to `next`, refusing anything but a forward step or a failure.
    pub fn advance(&mut self, next: PipelineState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(PortfolioError::Internal(format!(
                "illegal pipeline transition {:?} -> {next:?}",
                self.state
            )));
        }
        debug!(from = ?self.state, to = ?next, "pipeline transition");
        self.state = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Run the full pipeline for `url` without progress reporting.
pub async fn generate_portfolio(
    url: &str,
    options: &PipelineOptions,
    collaborators: &Collaborators,
) -> PipelineOutcome {
    generate_portfolio_with_progress(url, options, collaborators, &SilentProgress).await
}

/// Run the full pipeline for `url`.
///
/// Secondary-page failures are the only tolerated errors and turn a
/// successful run into `PartialFailure`. Any other error, or exceeding a
/// stage or run budget, ends the run with `Failure`.
#[instrument(skip_all, fields(url = %url, run_id = field::Empty))]
pub async fn generate_portfolio_with_progress(
    url: &str,
    options: &PipelineOptions,
    collaborators: &Collaborators,
    progress: &dyn ProgressReporter,
) -> PipelineOutcome {
    let run_id = Uuid::now_v7();
    tracing::Span::current().record("run_id", field::display(run_id));
    let start = Instant::now();

    let outcome = match SourceUrl::parse(url) {
        Ok(source) => run(&source, options, collaborators, progress).await,
        Err(e) => {
            warn!(error = %e, "rejected input URL");
            PipelineOutcome::failure(&e)
        }
    };

    match &outcome {
        PipelineOutcome::Failure { kind, message } => {
            warn!(%kind, %message, elapsed_ms = elapsed_ms(start), "pipeline failed");
        }
        other => info!(
            warnings = other.warnings().len(),
            elapsed_ms = elapsed_ms(start),
            "pipeline complete"
        ),
    }

    progress.done(&outcome);
    outcome
}

async fn run(
    source: &SourceUrl,
    options: &PipelineOptions,
    collaborators: &Collaborators,
    progress: &dyn ProgressReporter,
) -> PipelineOutcome {
    let mut tracker = StageTracker::new();
    progress.stage(tracker.state());

    let run_budget = options.stage_timeouts.total();
    let timed = tokio::time::timeout(
        run_budget,
        run_stages(source, options, collaborators, progress, &mut tracker),
    )
    .await;
    let result = match timed {
        Ok(result) => result,
        Err(_) => Err(PortfolioError::Timeout {
            stage: tracker.state().stage().unwrap_or(Stage::Synthesize),
        }),
    };

    match result {
        Ok((portfolio, warnings)) => PipelineOutcome::completed(portfolio, warnings),
        Err(e) => {
            if !tracker.state().is_terminal() && tracker.advance(PipelineState::Failed).is_ok() {
                progress.stage(PipelineState::Failed);
            }
            PipelineOutcome::failure(&e)
        }
    }
}

/// The four stages in order. Returns the portfolio and tolerated warnings.
async fn run_stages(
    source: &SourceUrl,
    options: &PipelineOptions,
    collaborators: &Collaborators,
    progress: &dyn ProgressReporter,
    tracker: &mut StageTracker,
) -> Result<(PortfolioResult, Vec<StageWarning>)> {
    let budgets = &options.stage_timeouts;

    // --- Fetch ---
    let fetcher = Fetcher::new(Arc::clone(&collaborators.http), FetchLimits::from(options));
    let report = fetcher.fetch(source, budgets.for_stage(Stage::Fetch)).await?;
    let total = report.pages.len();
    for (i, page) in report.pages.iter().enumerate() {
        progress.page_fetched(page.url.as_str(), i + 1, total);
    }
    let warnings = report.warnings;
    let pages = report.pages;

    // --- Extract ---
    enter(tracker, progress, PipelineState::Extracting)?;
    let fallback_name = source.host().to_string();
    let (blocks, contact, name) = run_blocking(Stage::Extract, budgets, move || {
        let blocks = extract_all(&pages)?;
        let contact = extract_contact(&pages);
        let name = pages.first().map(company_hint).unwrap_or(fallback_name);
        Ok((blocks, contact, name))
    })
    .await?;
    info!(blocks = blocks.len(), company = %name, "extract stage complete");

    // --- Select ---
    enter(tracker, progress, PipelineState::Selecting)?;
    let budget = options.content_budget_chars;
    let ranked: Vec<RankedBlock> =
        run_blocking(Stage::Select, budgets, move || Ok(select(&blocks, budget))).await?;
    let included = ranked.iter().filter(|r| r.included).count();
    if included == 0 {
        return Err(PortfolioError::Internal(
            "selector included no blocks from non-empty input".into(),
        ));
    }
    info!(ranked = ranked.len(), included, budget, "select stage complete");

    // --- Synthesize ---
    enter(tracker, progress, PipelineState::Synthesizing)?;
    let engine = SynthesisEngine::new(
        Arc::clone(&collaborators.model),
        Arc::clone(&collaborators.clock),
    )
    .with_retries(options.synthesis_retries)
    .with_max_summary_chars(options.max_summary_chars);
    let hint = CompanyHint {
        name,
        source_url: source.as_str().to_string(),
    };
    let limit = budgets.for_stage(Stage::Synthesize);
    let portfolio = tokio::time::timeout(limit, engine.synthesize(&ranked, &hint))
        .await
        .map_err(|_| PortfolioError::Timeout {
            stage: Stage::Synthesize,
        })??;
    let portfolio = with_contact(portfolio, contact);

    enter(tracker, progress, PipelineState::Done)?;
    Ok((portfolio, warnings))
}

fn enter(
    tracker: &mut StageTracker,
    progress: &dyn ProgressReporter,
    next: PipelineState,
) -> Result<()> {
    tracker.advance(next)?;
    progress.stage(next);
    Ok(())
}

/// Run CPU-bound stage work off the async workers under the stage's budget.
///
/// On timeout the blocking task is detached; its result is discarded.
async fn run_blocking<T, F>(stage: Stage, budgets: &StageTimeouts, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let limit = budgets.for_stage(stage);
    let handle = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(PortfolioError::Internal(format!("{stage} task failed: {e}"))),
        Err(_) => {
            warn!(%stage, limit_ms = limit.as_millis() as u64, "stage exceeded its budget");
            Err(PortfolioError::Timeout { stage })
        }
    }
}

fn with_contact(mut portfolio: PortfolioResult, contact: ContactInfo) -> PortfolioResult {
    portfolio.contact = contact;
    portfolio
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use portfolio_crawler::testing::StaticHttpClient;
    use portfolio_shared::{ErrorKind, FixedClock, NetworkErrorKind};

    use crate::testing::ScriptedModel;

    const VALID: &str = r#"{"company_name":"Acme","summary":"Acme forges anvils.",
        "offerings":["Anvils"],"highlights":["Since 1949"]}"#;

    const HOME: &str = r#"<html><head><title>Acme | Home</title></head><body>
        <h1>Acme Anvils</h1><p>Industrial anvils for every forge.</p>
        <a href="mailto:hello@acme.test">Mail</a></body></html>"#;

    #[derive(Default)]
    struct RecordingProgress {
        states: Mutex<Vec<PipelineState>>,
        pages: Mutex<Vec<String>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn stage(&self, state: PipelineState) {
            self.states.lock().unwrap().push(state);
        }
        fn page_fetched(&self, url: &str, _current: usize, _total: usize) {
            self.pages.lock().unwrap().push(url.to_string());
        }
        fn done(&self, _outcome: &PipelineOutcome) {}
    }

    /// Blocks the calling task in `stage()` when the run enters `state`.
    struct StallingProgress {
        inner: RecordingProgress,
        state: PipelineState,
        stall: Duration,
    }

    impl ProgressReporter for StallingProgress {
        fn stage(&self, state: PipelineState) {
            self.inner.stage(state);
            if state == self.state {
                std::thread::sleep(self.stall);
            }
        }
        fn page_fetched(&self, url: &str, current: usize, total: usize) {
            self.inner.page_fetched(url, current, total);
        }
        fn done(&self, _outcome: &PipelineOutcome) {}
    }

    /// A page large enough that extracting and ranking it takes real time.
    fn long_page(paragraphs: usize) -> String {
        let mut html = String::from("<html><body><main><h1>Acme Anvils</h1>");
        for i in 0..paragraphs {
            html.push_str(&format!("<p>Acme forged anvil number {i} for a customer.</p>"));
        }
        html.push_str("</main></body></html>");
        html
    }

    fn collaborators(http: StaticHttpClient, model: ScriptedModel) -> Collaborators {
        Collaborators::new(
            Arc::new(http),
            Arc::new(model),
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())),
        )
    }

    #[test]
    fn tracker_moves_forward_only() {
        let mut tracker = StageTracker::new();
        tracker.advance(PipelineState::Extracting).unwrap();
        assert!(tracker.advance(PipelineState::Fetching).is_err());
        assert!(tracker.advance(PipelineState::Synthesizing).is_err());
        tracker.advance(PipelineState::Selecting).unwrap();
        tracker.advance(PipelineState::Failed).unwrap();
        assert!(tracker.advance(PipelineState::Failed).is_err());
        assert_eq!(tracker.state(), PipelineState::Failed);
    }

    #[tokio::test]
    async fn successful_run_reports_every_stage() {
        let http = StaticHttpClient::new().with_page("https://acme.test/", HOME);
        let collab = collaborators(http, ScriptedModel::new().with_reply(VALID));
        let progress = RecordingProgress::default();

        let outcome = generate_portfolio_with_progress(
            "acme.test",
            &PipelineOptions::default(),
            &collab,
            &progress,
        )
        .await;

        let PipelineOutcome::Success { portfolio } = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(portfolio.company_name, "Acme");
        assert_eq!(portfolio.source_url, "https://acme.test/");
        assert_eq!(portfolio.contact.emails, vec!["hello@acme.test"]);
        assert_eq!(
            *progress.states.lock().unwrap(),
            vec![
                PipelineState::Fetching,
                PipelineState::Extracting,
                PipelineState::Selecting,
                PipelineState::Synthesizing,
                PipelineState::Done,
            ]
        );
        assert_eq!(*progress.pages.lock().unwrap(), vec!["https://acme.test/"]);
    }

    #[tokio::test]
    async fn company_hint_reaches_the_prompt() {
        let http = StaticHttpClient::new().with_page("https://acme.test/", HOME);
        let model = Arc::new(ScriptedModel::new().with_reply(VALID));
        let collab = Collaborators::new(
            Arc::new(http),
            model.clone(),
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())),
        );

        generate_portfolio("https://acme.test", &PipelineOptions::default(), &collab).await;
        assert!(model.prompts()[0].contains("The site suggests \"Acme\""));
    }

    #[tokio::test]
    async fn invalid_url_fails_without_fetching() {
        let collab = collaborators(StaticHttpClient::new(), ScriptedModel::new());
        let outcome =
            generate_portfolio("ftp://acme.test", &PipelineOptions::default(), &collab).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::InvalidUrl));
    }

    #[tokio::test]
    async fn entry_failure_marks_run_failed() {
        let http = StaticHttpClient::new()
            .with_failure("https://acme.test/", NetworkErrorKind::ConnectionRefused);
        let collab = collaborators(http, ScriptedModel::new());
        let progress = RecordingProgress::default();

        let outcome = generate_portfolio_with_progress(
            "https://acme.test/",
            &PipelineOptions::default(),
            &collab,
            &progress,
        )
        .await;

        assert_eq!(
            outcome.error_kind(),
            Some(ErrorKind::Network(NetworkErrorKind::ConnectionRefused))
        );
        assert_eq!(
            *progress.states.lock().unwrap(),
            vec![PipelineState::Fetching, PipelineState::Failed]
        );
    }

    #[tokio::test]
    async fn empty_site_is_extraction_failure() {
        let http = StaticHttpClient::new().with_page(
            "https://acme.test/",
            r#"<html><body><div id="app"></div><script src="/bundle.js"></script></body></html>"#,
        );
        let collab = collaborators(http, ScriptedModel::new().with_reply(VALID));
        let outcome =
            generate_portfolio("https://acme.test/", &PipelineOptions::default(), &collab).await;
        assert_eq!(
            outcome.error_kind().map(|k| k.to_string()).as_deref(),
            Some("ExtractionError:EmptyContent")
        );
    }

    #[tokio::test]
    async fn slow_model_times_out_synthesis() {
        let http = StaticHttpClient::new().with_page("https://acme.test/", HOME);
        let model = ScriptedModel::new().with_delayed_reply(Duration::from_secs(30), VALID);
        let collab = collaborators(http, model);
        let mut options = PipelineOptions::default();
        options.stage_timeouts.synthesize = Duration::from_millis(50);

        let outcome = generate_portfolio("https://acme.test/", &options, &collab).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Timeout(Stage::Synthesize)));
    }

    #[tokio::test]
    async fn extract_budget_exceeded_reports_extract_timeout() {
        let http = StaticHttpClient::new().with_page("https://acme.test/", &long_page(20_000));
        let model = Arc::new(ScriptedModel::new().with_reply(VALID));
        let collab = Collaborators::new(
            Arc::new(http),
            model.clone(),
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())),
        );
        let mut options = PipelineOptions::default();
        options.stage_timeouts.extract = Duration::from_millis(1);
        let progress = RecordingProgress::default();

        let outcome =
            generate_portfolio_with_progress("https://acme.test/", &options, &collab, &progress)
                .await;

        assert_eq!(outcome.error_kind(), Some(ErrorKind::Timeout(Stage::Extract)));
        assert_eq!(
            *progress.states.lock().unwrap(),
            vec![
                PipelineState::Fetching,
                PipelineState::Extracting,
                PipelineState::Failed
            ]
        );
        assert!(model.prompts().is_empty());
    }

    #[tokio::test]
    async fn select_budget_exceeded_reports_select_timeout() {
        let http = StaticHttpClient::new().with_page("https://acme.test/", &long_page(20_000));
        let collab = collaborators(http, ScriptedModel::new().with_reply(VALID));
        let mut options = PipelineOptions::default();
        options.stage_timeouts.extract = Duration::from_secs(60);
        options.stage_timeouts.select = Duration::ZERO;
        let progress = RecordingProgress::default();

        let outcome =
            generate_portfolio_with_progress("https://acme.test/", &options, &collab, &progress)
                .await;

        assert_eq!(outcome.error_kind(), Some(ErrorKind::Timeout(Stage::Select)));
        assert_eq!(
            *progress.states.lock().unwrap(),
            vec![
                PipelineState::Fetching,
                PipelineState::Extracting,
                PipelineState::Selecting,
                PipelineState::Failed
            ]
        );
    }

    #[tokio::test]
    async fn run_budget_exceeded_reports_the_current_stage() {
        let http = StaticHttpClient::new().with_page("https://acme.test/", HOME);
        let model = Arc::new(ScriptedModel::new().with_reply(VALID));
        let collab = Collaborators::new(
            Arc::new(http),
            model.clone(),
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())),
        );
        let mut options = PipelineOptions::default();
        options.stage_timeouts.fetch = Duration::from_millis(50);
        options.stage_timeouts.extract = Duration::from_millis(100);
        options.stage_timeouts.select = Duration::from_millis(100);
        options.stage_timeouts.synthesize = Duration::from_millis(50);
        // Stalls past the 300ms run budget while each stage stays within its own.
        let progress = StallingProgress {
            inner: RecordingProgress::default(),
            state: PipelineState::Extracting,
            stall: Duration::from_millis(400),
        };

        let outcome =
            generate_portfolio_with_progress("https://acme.test/", &options, &collab, &progress)
                .await;

        // The run timer fires at the first suspension after the stall, which is
        // the extract task or, if that finished first, the select task.
        let kind = outcome.error_kind();
        assert!(
            matches!(
                kind,
                Some(ErrorKind::Timeout(Stage::Extract)) | Some(ErrorKind::Timeout(Stage::Select))
            ),
            "unexpected outcome {outcome:?}"
        );
        let states = progress.inner.states.lock().unwrap();
        assert_eq!(states.last(), Some(&PipelineState::Failed));
        assert!(!states.contains(&PipelineState::Synthesizing));
        assert!(model.prompts().is_empty());
    }
}
