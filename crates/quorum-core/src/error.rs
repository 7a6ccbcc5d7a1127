//! Error types for the Quorum core library

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QuorumError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuorumError {
    /// Malformed input, rejected before any state is touched
    #[error("Validation error: {0}")]
    Validation(String),

    /// Well-formed input that the current state does not accept
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("{kind} session {id} has expired")]
    Expired { kind: SessionKind, id: String },

    #[error("{kind} session {id} has closed")]
    Closed { kind: SessionKind, id: String },

    #[error("{participant} is not a participant of {kind} {id}")]
    NotParticipant {
        kind: SessionKind,
        id: String,
        participant: String,
    },

    #[error("participant {participant} already submitted to {kind} {id}")]
    DuplicateSubmission {
        kind: SessionKind,
        id: String,
        participant: String,
    },

    #[error("duplicate public key received")]
    DuplicatePublicKey,

    #[error("{kind} {id} is not completed yet")]
    NotCompleted { kind: SessionKind, id: String },

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Signature verification failed")]
    SignatureVerificationFailed,
}

/// Which ceremony an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Keygen,
    Signing,
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionKind::Keygen => write!(f, "keygen"),
            SessionKind::Signing => write!(f, "signing"),
        }
    }
}
