//! Core pipeline orchestration for portfolio generation.
//!
//! This crate ties together fetching, content extraction, relevance
//! selection, and language-model synthesis into a single entry point,
//! [`generate_portfolio`].

pub mod llm;
pub mod pipeline;
pub mod select;
pub mod synthesis;
pub mod testing;

pub use llm::OpenAiCompatibleModel;
pub use pipeline::{
    Collaborators, ProgressReporter, SilentProgress, StageTracker, generate_portfolio,
    generate_portfolio_with_progress,
};
pub use select::{DOMAIN_LEXICON, select};
pub use synthesis::{CompanyHint, LanguageModel, PORTFOLIO_SCHEMA_HINT, SynthesisEngine};
