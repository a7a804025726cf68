//! Error types for PageWatch.
//!
//! Library crates use [`PageWatchError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all PageWatch operations.
#[derive(Debug, thiserror::Error)]
pub enum PageWatchError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside of a page fetch (client construction, etc.).
    #[error("network error: {0}")]
    Network(String),

    /// The content fetcher could not produce the target element's markup.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// HTML or payload parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Generation service error (status, transport, timeout or response shape).
    #[error("summarize error: {0}")]
    Summarize(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad schedule, unknown target, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PageWatchError>;

impl PageWatchError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
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

    /// Short machine-friendly name of the error class, used in error observations.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "ConfigError",
            Self::Network(_) => "NetworkError",
            Self::Fetch(e) => e.kind(),
            Self::Parse { .. } => "ParseError",
            Self::Storage(_) => "StoreError",
            Self::Summarize(_) => "SummarizeError",
            Self::Io { .. } => "IoError",
            Self::Validation { .. } => "ValidationError",
        }
    }
}

/// Why the content fetcher failed to return an element's markup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The page answered with a non-2xx status.
    #[error("page load failed: HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// The page did not load within the configured timeout.
    #[error("page load timed out after {timeout_secs}s: {url}")]
    Timeout { url: String, timeout_secs: u64 },

    /// Connection, TLS, redirect or body-read failure.
    #[error("page load failed: {reason}")]
    Transport { reason: String },

    /// The selector string is not a valid CSS selector.
    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// No element matching the selector is attached to the document.
    #[error("element not found for selector `{selector}`")]
    SelectorNotFound { selector: String },

    /// The element exists but its inner markup is blank.
    #[error("element `{selector}` has empty content")]
    EmptyContent { selector: String },
}

impl FetchError {
    /// Short machine-friendly name of the failure.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "HttpStatus",
            Self::Timeout { .. } => "Timeout",
            Self::Transport { .. } => "Transport",
            Self::InvalidSelector { .. } => "InvalidSelector",
            Self::SelectorNotFound { .. } => "SelectorNotFound",
            Self::EmptyContent { .. } => "EmptyContent",
        }
    }
}
