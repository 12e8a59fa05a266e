//! Error types for the download module.
//!
//! Two families live here:
//! - [`DownloadError`] describes what went wrong talking to a server or the
//!   disk during one transfer attempt. These never reach the presentation
//!   layer; the scheduler retries them.
//! - [`EngineError`] is returned from engine commands (delete, pause, save)
//!   and is the only user-actionable error surface.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::db::DbError;
use crate::store::StoreError;

/// Errors that can occur during a single transfer attempt.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection reset, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request or body read timed out.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Unexpected HTTP status (anything other than 2xx, or 416 on a finished artifact).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error on the partial artifact.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or uses an unsupported scheme.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
        /// Why the URL was rejected.
        reason: String,
    },

    /// Server answered a range request starting at the wrong offset.
    #[error("range mismatch downloading {url}: requested offset {expected}, server sent {actual}")]
    RangeMismatch {
        /// The URL being downloaded.
        url: String,
        /// Offset that was requested.
        expected: u64,
        /// Offset the server's `Content-Range` started at.
        actual: u64,
    },

    /// Body ended before the advertised length was reached.
    #[error("body ended early downloading {url}: expected {expected} bytes, have {actual}")]
    Incomplete {
        /// The URL being downloaded.
        url: String,
        /// Advertised total length.
        expected: u64,
        /// Bytes on disk when the body ended.
        actual: u64,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error, folding timeouts into [`Self::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::Timeout { url: url.into() };
        }
        Self::Network {
            url: url.into(),
            source,
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
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a range mismatch error.
    pub fn range_mismatch(url: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::RangeMismatch {
            url: url.into(),
            expected,
            actual,
        }
    }

    /// Creates a premature end-of-body error.
    pub fn incomplete(url: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::Incomplete {
            url: url.into(),
            expected,
            actual,
        }
    }
}

/// Where in the transfer lifecycle a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
    /// HEAD probe (or its ranged-GET fallback) failed.
    Probe,
    /// The GET or the body stream failed mid-transfer.
    Transfer,
}

impl fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probe => f.write_str("probe"),
            Self::Transfer => f.write_str("transfer"),
        }
    }
}

/// A failed transfer attempt, tagged with its phase.
#[derive(Debug, Error)]
#[error("{phase} failed: {error}")]
pub struct TransferFailure {
    /// Lifecycle phase that failed.
    pub phase: FailurePhase,
    /// Underlying error.
    #[source]
    pub error: DownloadError,
}

impl TransferFailure {
    /// Wraps an error raised while probing.
    #[must_use]
    pub fn probe(error: DownloadError) -> Self {
        Self {
            phase: FailurePhase::Probe,
            error,
        }
    }

    /// Wraps an error raised while streaming.
    #[must_use]
    pub fn transfer(error: DownloadError) -> Self {
        Self {
            phase: FailurePhase::Transfer,
            error,
        }
    }
}

/// Errors returned by engine commands.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No download is registered under this URL.
    #[error("no download registered for {url}")]
    NotFound {
        /// The URL that was looked up.
        url: String,
    },

    /// Save was requested before the download finished.
    #[error("download of {url} has not completed")]
    NotComplete {
        /// The URL that is still in flight.
        url: String,
    },

    /// Save target already exists and overwrite was not requested.
    #[error("destination already exists: {path}")]
    DestinationExists {
        /// The existing destination path.
        path: PathBuf,
    },

    /// File system error while saving or preparing directories.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {source}")]
    Http {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },

    /// Persisted state could not be read or written.
    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    /// Database could not be opened.
    #[error("database error: {0}")]
    Db(#[from] DbError),
}

impl EngineError {
    /// Creates a not-found error.
    pub fn not_found(url: impl Into<String>) -> Self {
        Self::NotFound { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable label used on the host boundary.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "notFound",
            Self::NotComplete { .. } => "notComplete",
            Self::DestinationExists { .. } => "destinationExists",
            Self::Io { .. } => "io",
            Self::Http { .. } => "http",
            Self::Store(_) | Self::Db(_) => "store",
        }
    }
}

// Like the transfer errors above, no `From<std::io::Error>` is provided: every
// IO failure needs the path that caused it.
