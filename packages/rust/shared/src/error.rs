//! Error types for the portfolio pipeline.
//!
//! Library crates use [`PortfolioError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Every error projects onto an [`ErrorKind`], the serializable tag carried by
//! [`PipelineOutcome::Failure`](crate::PipelineOutcome::Failure) and by stage
//! warnings.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::Stage;

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Transport-level failure classes for a single HTTP fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorKind {
    /// Host name could not be resolved.
    Dns,
    /// The remote refused or dropped the connection.
    ConnectionRefused,
    /// The request did not complete within its timeout.
    Timeout,
    /// The server answered with a status >= 400.
    HttpStatus(u16),
    /// Any other transport failure (TLS, body read, protocol).
    Transport,
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns => f.write_str("DNS"),
            Self::ConnectionRefused => f.write_str("ConnectionRefused"),
            Self::Timeout => f.write_str("Timeout"),
            Self::HttpStatus(code) => write!(f, "HTTPStatus({code})"),
            Self::Transport => f.write_str("Transport"),
        }
    }
}

/// Content extraction failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionErrorKind {
    /// No usable text blocks survived extraction.
    EmptyContent,
}

/// Synthesis failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisErrorKind {
    /// The model never produced a response that passed validation.
    SchemaInvalid,
    /// The model could not be reached or failed upstream.
    ModelUnavailable,
}

/// Serializable classification of a [`PortfolioError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidUrl,
    Network(NetworkErrorKind),
    TooManyRedirects,
    Extraction(ExtractionErrorKind),
    Synthesis(SynthesisErrorKind),
    Timeout(Stage),
    Config,
    Io,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl => f.write_str("InvalidURL"),
            Self::Network(kind) => write!(f, "NetworkError:{kind}"),
            Self::TooManyRedirects => f.write_str("TooManyRedirects"),
            Self::Extraction(ExtractionErrorKind::EmptyContent) => {
                f.write_str("ExtractionError:EmptyContent")
            }
            Self::Synthesis(SynthesisErrorKind::SchemaInvalid) => {
                f.write_str("SynthesisError:SchemaInvalid")
            }
            Self::Synthesis(SynthesisErrorKind::ModelUnavailable) => {
                f.write_str("SynthesisError:ModelUnavailable")
            }
            Self::Timeout(stage) => write!(f, "Timeout:{stage}"),
            Self::Config => f.write_str("ConfigError"),
            Self::Io => f.write_str("IoError"),
            Self::Internal => f.write_str("InternalError"),
        }
    }
}

// ---------------------------------------------------------------------------
// PortfolioError
// ---------------------------------------------------------------------------

/// Top-level error type for all pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum PortfolioError {
    /// The input could not be accepted as an absolute http(s) URL.
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Network/HTTP error during a fetch.
    #[error("network error ({kind}) fetching {url}: {message}")]
    Network {
        url: String,
        kind: NetworkErrorKind,
        message: String,
    },

    /// Redirect chain longer than the configured bound.
    #[error("too many redirects (limit {limit}) starting at {url}")]
    TooManyRedirects { url: String, limit: usize },

    /// HTML content extraction error.
    #[error("extraction error: {message}")]
    Extraction {
        kind: ExtractionErrorKind,
        message: String,
    },

    /// Language model error (transport or response validation).
    #[error("synthesis error ({kind:?}): {message}")]
    Synthesis {
        kind: SynthesisErrorKind,
        message: String,
    },

    /// A pipeline stage exceeded its time budget.
    #[error("stage `{stage}` exceeded its time budget")]
    Timeout { stage: Stage },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Broken internal invariant (task panic, illegal state transition).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PortfolioError>;

impl PortfolioError {
    /// Create an invalid-URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a network error of the given kind.
    pub fn network(
        url: impl Into<String>,
        kind: NetworkErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Network {
            url: url.into(),
            kind,
            message: message.into(),
        }
    }

    /// Create an empty-content extraction error.
    pub fn empty_content(msg: impl Into<String>) -> Self {
        Self::Extraction {
            kind: ExtractionErrorKind::EmptyContent,
            message: msg.into(),
        }
    }

    /// Create a schema-invalid synthesis error.
    pub fn schema_invalid(msg: impl Into<String>) -> Self {
        Self::Synthesis {
            kind: SynthesisErrorKind::SchemaInvalid,
            message: msg.into(),
        }
    }

    /// Create a model-unavailable synthesis error.
    pub fn model_unavailable(msg: impl Into<String>) -> Self {
        Self::Synthesis {
            kind: SynthesisErrorKind::ModelUnavailable,
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The serializable classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl { .. } => ErrorKind::InvalidUrl,
            Self::Network { kind, .. } => ErrorKind::Network(*kind),
            Self::TooManyRedirects { .. } => ErrorKind::TooManyRedirects,
            Self::Extraction { kind, .. } => ErrorKind::Extraction(*kind),
            Self::Synthesis { kind, .. } => ErrorKind::Synthesis(*kind),
            Self::Timeout { stage } => ErrorKind::Timeout(*stage),
            Self::Config { .. } => ErrorKind::Config,
            Self::Io { .. } => ErrorKind::Io,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}
