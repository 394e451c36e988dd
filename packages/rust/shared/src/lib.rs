//! Shared types, error model, and configuration for the portfolio pipeline.
//!
//! This crate is the foundation depended on by all other portfolio crates.
//! It provides:
//! - [`PortfolioError`]: the unified error type, and its [`ErrorKind`] projection
//! - Domain types ([`SourceUrl`], [`FetchedPage`], [`ContentBlock`], [`RankedBlock`],
//!   [`PortfolioResult`], [`PipelineOutcome`])
//! - Configuration ([`AppConfig`], [`PipelineOptions`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, LlmConfig, PipelineConfig, PipelineOptions, StageTimeouts, StageTimeoutsConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{
    ErrorKind, ExtractionErrorKind, NetworkErrorKind, PortfolioError, Result, SynthesisErrorKind,
};
pub use types::{
    BlockKind, Clock, ContactInfo, ContentBlock, FetchedPage, FixedClock, PipelineOutcome,
    PipelineState, PortfolioResult, RankedBlock, SourceUrl, Stage, StageWarning, SystemClock,
    normalize_url, normalize_whitespace,
};
