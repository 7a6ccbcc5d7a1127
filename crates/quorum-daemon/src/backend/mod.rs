//! Signature backend interface
//!
//! The backend holds this validator's key shares. It is reached either
//! through unary calls (one call per key share or signature) or through one
//! bidirectional stream per ceremony that exchanges protocol traffic.

pub mod grpc;
pub mod proto;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::sync::mpsc;

use quorum_core::{PublicKey, Signature, StreamResult, TrafficOut};

use crate::error::Result;

pub use grpc::GrpcBackend;

/// Whether the backend holds a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPresence {
    Unspecified,
    Present,
    Absent,
    Fail,
}

impl KeyPresence {
    /// Present and absent both mean the backend answered sensibly
    pub fn is_healthy(&self) -> bool {
        matches!(self, KeyPresence::Present | KeyPresence::Absent)
    }
}

/// Unary backend operations
#[async_trait]
pub trait SignatureBackend: Send + Sync {
    /// Generate the key share `key_uid` and return its public key
    async fn keygen(&self, key_uid: &str, party_uid: &str) -> Result<PublicKey>;

    /// Sign a 32-byte digest with the key share `key_uid`
    async fn sign(
        &self,
        key_uid: &str,
        digest: &[u8; 32],
        party_uid: &str,
        pub_key: &PublicKey,
    ) -> Result<Signature>;

    async fn key_presence(&self, key_uid: &str) -> Result<KeyPresence>;
}

/// Parameters a streamed ceremony is opened with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamInit {
    Keygen {
        new_key_uid: String,
        party_uids: Vec<String>,
        party_share_counts: Vec<u32>,
        my_party_index: u32,
    },
    Sign {
        new_sig_uid: String,
        key_uid: String,
        party_uids: Vec<String>,
        message_to_sign: Vec<u8>,
    },
}

/// Protocol message relayed to the backend from another party
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficIn {
    pub from_party_uid: String,
    pub payload: Vec<u8>,
    pub is_broadcast: bool,
}

/// Message produced by the backend on a ceremony stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    Traffic(TrafficOut),
    Result(StreamResult),
}

/// Both halves of an open ceremony stream
pub struct CeremonyStream {
    /// Traffic from other parties; dropping it closes the stream
    pub outbound: mpsc::UnboundedSender<TrafficIn>,
    /// Messages from the backend, ending at EOF
    pub inbound: BoxStream<'static, Result<StreamMessage>>,
}

/// Streaming backend operations
#[async_trait]
pub trait StreamingBackend: Send + Sync {
    async fn open(&self, init: StreamInit) -> Result<CeremonyStream>;
}
