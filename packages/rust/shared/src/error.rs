//! Error types for CorpusBuilder.
//!
//! Library crates use [`CorpusBuilderError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level error type for all CorpusBuilder operations.
#[derive(Debug, thiserror::Error)]
pub enum CorpusBuilderError {
    /// The configured repository, ref, or subpath does not exist.
    #[error("source unavailable: {source_label}: {message}")]
    SourceUnavailable {
        source_label: String,
        message: String,
    },

    /// The hosting API throttled the request. Retryable.
    #[error("rate limited by upstream host")]
    RateLimited { retry_after: Option<Duration> },

    /// A file could not be retrieved after exhausting retries.
    #[error("fetch failed for {path} after {attempts} attempt(s): {reason}")]
    FetchFailed {
        path: String,
        attempts: u32,
        reason: String,
    },

    /// The document normalized to nothing.
    #[error("document {path} is empty after normalization")]
    NormalizationEmpty { path: String },

    /// The corpus file rejected a write. Fatal for the whole run.
    #[error("corpus write failed at {path:?}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transient network failure (connect, timeout, body read). Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// Unexpected HTTP status from the upstream host.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (malformed corpus line, bad input, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The run was cancelled before the operation could complete.
    #[error("operation cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CorpusBuilderError>;

/// Stable, serializable classification of an error, used in run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceUnavailable,
    RateLimited,
    FetchFailed,
    NormalizationEmpty,
    WriteFailed,
    Config,
    Network,
    Http,
    Io,
    Validation,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SourceUnavailable => "SourceUnavailable",
            Self::RateLimited => "RateLimited",
            Self::FetchFailed => "FetchFailed",
            Self::NormalizationEmpty => "NormalizationEmpty",
            Self::WriteFailed => "WriteFailed",
            Self::Config => "Config",
            Self::Network => "Network",
            Self::Http => "Http",
            Self::Io => "Io",
            Self::Validation => "Validation",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

impl CorpusBuilderError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
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

    /// Create a source-unavailable error for the given source label.
    pub fn source_unavailable(source_label: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_label: source_label.into(),
            message: msg.into(),
        }
    }

    /// Create a write failure for the corpus at `path`.
    pub fn write_failed(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::WriteFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether a bounded retry may succeed where this attempt failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Network(_) => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Host-provided delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// The summary classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::FetchFailed { .. } => ErrorKind::FetchFailed,
            Self::NormalizationEmpty { .. } => ErrorKind::NormalizationEmpty,
            Self::WriteFailed { .. } => ErrorKind::WriteFailed,
            Self::Config { .. } => ErrorKind::Config,
            Self::Network(_) => ErrorKind::Network,
            Self::Http { .. } => ErrorKind::Http,
            Self::Io { .. } => ErrorKind::Io,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = CorpusBuilderError::config("fetch_concurrency must be at least 1");
        assert_eq!(
            err.to_string(),
            "config error: fetch_concurrency must be at least 1"
        );

        let err = CorpusBuilderError::FetchFailed {
            path: "docs/intro.md".into(),
            attempts: 3,
            reason: "HTTP 502".into(),
        };
        assert!(err.to_string().contains("docs/intro.md"));
        assert!(err.to_string().contains("3 attempt(s)"));
    }

    #[test]
    fn retryable_classification() {
        assert!(CorpusBuilderError::RateLimited { retry_after: None }.is_retryable());
        assert!(CorpusBuilderError::Network("timeout".into()).is_retryable());
        assert!(
            CorpusBuilderError::Http {
                status: 503,
                url: "https://api.github.com".into()
            }
            .is_retryable()
        );
        assert!(
            !CorpusBuilderError::Http {
                status: 404,
                url: "https://api.github.com".into()
            }
            .is_retryable()
        );
        assert!(!CorpusBuilderError::source_unavailable("a/b:docs@main", "404").is_retryable());
        assert!(!CorpusBuilderError::write_failed("/tmp/c.jsonl", "disk full").is_retryable());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::SourceUnavailable).expect("serialize");
        assert_eq!(json, "\"source_unavailable\"");
        assert_eq!(ErrorKind::WriteFailed.to_string(), "WriteFailed");
    }
}
