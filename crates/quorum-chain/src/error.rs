//! Error types for the ceremony store

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, ChainError>;

/// Errors returned by keeper operations and message handling
#[derive(Debug, Error)]
pub enum ChainError {
    /// Session or key level validation error
    #[error(transparent)]
    Core(#[from] quorum_core::QuorumError),

    /// Referenced entity does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Right shape, wrong state
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Sender is not allowed to submit this message
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Parameter or wiring error, raised at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// A member of a batch failed; the whole batch was discarded
    #[error("message {index} of batch failed: {source}")]
    BatchMember {
        index: usize,
        #[source]
        source: Box<ChainError>,
    },

    /// Work inside a savepoint panicked and was rolled back
    #[error("Panicked: {0}")]
    Panicked(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ChainError {
    fn from(e: serde_json::Error) -> Self {
        ChainError::Serialization(e.to_string())
    }
}
