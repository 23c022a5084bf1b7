//! Error types for commitscope-core

use thiserror::Error;

/// Main error type for the commitscope-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Source rate limit hit; retry after the given number of seconds if known
    #[error("source rate limited")]
    RateLimited {
        /// Seconds until the limit resets, when the source reported one
        retry_after_secs: Option<u64>,
    },

    /// Transient source failure (network error, timeout, 5xx)
    #[error("transient source error: {0}")]
    SourceTransient(String),

    /// Source returned a page that does not match the expected shape.
    ///
    /// Never skipped: a malformed page fails the whole fetch so a
    /// completed range can never silently miss commits.
    #[error("malformed source response: {0}")]
    MalformedResponse(String),

    /// Non-retryable source failure (auth, unknown repository)
    #[error("source error: {0}")]
    Source(String),
}

impl Error {
    /// True for failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RateLimited { .. } | Error::SourceTransient(_))
    }
}

/// Result type alias for commitscope-core
pub type Result<T> = std::result::Result<T, Error>;
