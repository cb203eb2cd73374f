//! Error types for tpsync.
//!
//! Library crates use [`TpsyncError`] via `thiserror`.
//! App crates (cli/webhook) wrap this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Maximum number of characters of an upstream response body kept in errors.
pub const BODY_EXCERPT_CHARS: usize = 200;

/// Top-level error type for all tpsync operations.
#[derive(Debug, thiserror::Error)]
pub enum TpsyncError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/timeout error talking to the CRM or the compliance API.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status from an external API.
    #[error("{service} returned HTTP {status}: {body}")]
    UpstreamStatus {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// Response body could not be parsed or is missing expected fields.
    #[error("malformed payload: {message}")]
    MalformedPayload { message: String },

    /// Read or write failure on the durable ledger file.
    #[error("ledger I/O error at {path:?}: {source}")]
    LedgerIo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Filesystem I/O error outside the ledger.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Caller-side validation error (oversized batch, bad argument, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TpsyncError>;

impl TpsyncError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a malformed-payload error from any displayable message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPayload {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an upstream status error, keeping only an excerpt of the body.
    pub fn upstream(service: &'static str, status: u16, body: &str) -> Self {
        Self::UpstreamStatus {
            service,
            status,
            body: excerpt(body),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a ledger read/write failure.
    pub fn ledger_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LedgerIo {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Anything the remote side answered or failed to answer is worth another
    /// attempt; local config, validation and parse failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::UpstreamStatus { .. })
    }
}

/// Truncate a response body to [`BODY_EXCERPT_CHARS`] characters.
pub fn excerpt(body: &str) -> String {
    match body.char_indices().nth(BODY_EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
