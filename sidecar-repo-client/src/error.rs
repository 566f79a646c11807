//! Error types for repository operations.

use thiserror::Error;

/// Result type for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// Errors that can occur talking to the configuration repository.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("network error: {0}")]
    Network(String),

    /// The repository answered with a non-success status.
    #[error("repository returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The referenced namespace does not exist.
    #[error("namespace not found: {0}")]
    NotFound(String),

    /// Failure injected by a test double.
    #[error("injected failure: {0}")]
    Injected(String),
}

impl From<reqwest::Error> for RepoError {
    fn from(err: reqwest::Error) -> Self {
        RepoError::Network(err.to_string())
    }
}
