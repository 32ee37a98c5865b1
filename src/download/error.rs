//! Error types for a single artifact URL.
//!
//! A [`FetchError`] never aborts a batch: it fails one URL and the
//! orchestrator advances to the next candidate URL. Variants carry owned
//! strings so per-URL reasons can travel inside outcomes.

use std::path::PathBuf;

use thiserror::Error;

/// Why one candidate URL did not yield an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// No complete response within the request timeout.
    #[error("timeout fetching {url}\n  Suggestion: Raise request_timeout_secs if the mirror is slow")]
    Timeout { url: String },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    /// The server answered with an HTML page where a book was expected.
    #[error("{url} returned an HTML page instead of a book")]
    NotABook { url: String },

    /// Body below the minimum artifact size.
    #[error("{url} returned only {bytes} bytes (minimum {minimum})")]
    TooSmall { url: String, bytes: u64, minimum: u64 },

    /// File system error while writing the artifact.
    #[error("IO error writing to {path}: {message}\n  Suggestion: Check that the output directory is writable and has free space")]
    Io { path: PathBuf, message: String },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },
}

impl FetchError {
    /// Classifies a reqwest error, separating timeouts.
    pub fn from_reqwest(url: impl Into<String>, error: &reqwest::Error) -> Self {
        let url = url.into();
        if error.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network {
                url,
                message: error.to_string(),
            }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: source.to_string(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// True for failures caused by the local filesystem rather than the source.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}
