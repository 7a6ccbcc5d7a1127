//! Error types for the Quorum daemon

use thiserror::Error;

/// Result type alias for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors that can occur in the daemon
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] quorum_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Signature backend reported a failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// gRPC call failed
    #[error("RPC error: {0}")]
    Rpc(#[from] tonic::Status),

    /// gRPC connection failed
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Submission through the broadcast pipeline failed
    #[error("Broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),

    /// A ceremony session with this ID is already open
    #[error("Session {0} already open")]
    SessionExists(String),

    /// IPC error
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No new block within the watchdog timeout
    #[error("No new block observed within the watchdog timeout")]
    Stalled,

    /// Timeout
    #[error("Operation timed out")]
    Timeout,

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for DaemonError {
    fn from(e: serde_json::Error) -> Self {
        DaemonError::Serialization(e.to_string())
    }
}

/// Ledger-side outcome of a submission, classified for retry decisions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BroadcastError {
    /// The account sequence used for signing is stale
    #[error("account sequence mismatch")]
    WrongSequence,

    /// The transaction ran out of gas
    #[error("out of gas")]
    OutOfGas,

    /// The ledger executed the transaction and rejected it
    #[error("execution failed with code {code}: {log}")]
    Execution {
        code: u32,
        log: String,
        /// Failing member when the transaction carried a batch
        message_index: Option<usize>,
    },

    /// The ledger could not be reached
    #[error("transport: {0}")]
    Transport(String),

    /// The transaction was not included within the confirmation timeout
    #[error("timed out waiting for inclusion")]
    Timeout,
}

impl BroadcastError {
    /// Whether resubmitting the same messages can succeed
    pub fn is_retriable(&self) -> bool {
        !matches!(self, BroadcastError::Execution { .. })
    }
}
