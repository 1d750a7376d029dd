//! Common error types for StudyFindr

use thiserror::Error;

/// Common result type for StudyFindr operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by every engine component
///
/// Empty results (no reviews, no bookmarks) are not errors; they are normal
/// terminal states of the components that produce them.
#[derive(Error, Debug)]
pub enum Error {
    /// An action requiring a current user was attempted without one
    #[error("Not signed in: {0}")]
    Unauthenticated(String),

    /// Request rejected, timed out, or answered with a malformed response
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid caller input (ratings out of range, bad coordinates, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An operation on the same resource is still in flight
    #[error("Busy: {0}")]
    Busy(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error belongs to the network failure path
    ///
    /// Network failures trigger rollback for optimistic operations and a retry
    /// affordance for feeds.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Network(format!("malformed response: {}", err))
    }
}
