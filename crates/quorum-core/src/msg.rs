//! Messages submitted to the ceremony store

use serde::{Deserialize, Serialize};

use crate::crypto::{PublicKey, Signature};
use crate::error::{QuorumError, Result};
use crate::types::{hex_bytes, validate_string, AccAddress, ChainName, KeyId};

/// Upper bound on the number of messages merged into one batch
pub const MAX_BATCH_SIZE: usize = 1024;

/// Outgoing protocol message produced by a streaming signature backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficOut {
    pub to_party_uid: String,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    pub is_broadcast: bool,
}

/// Terminal outcome of a streamed ceremony
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StreamResult {
    PubKey(#[serde(with = "hex_bytes")] Vec<u8>),
    Signature(#[serde(with = "hex_bytes")] Vec<u8>),
    /// Parties the protocol found misbehaving
    Criminals(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Msg {
    StartKeygen {
        sender: AccAddress,
        key_id: KeyId,
    },
    SubmitPubKey {
        sender: AccAddress,
        key_id: KeyId,
        pub_key: PublicKey,
        /// Proof of ownership: signature over the validator's ownership digest
        signature: Signature,
    },
    SubmitSignature {
        sender: AccAddress,
        sig_id: u64,
        signature: Signature,
    },
    RotateKey {
        sender: AccAddress,
        chain: ChainName,
        key_id: KeyId,
    },
    KeygenOptOut {
        sender: AccAddress,
    },
    KeygenOptIn {
        sender: AccAddress,
    },
    ProcessKeygenTraffic {
        sender: AccAddress,
        session_id: String,
        payload: TrafficOut,
    },
    ProcessSignTraffic {
        sender: AccAddress,
        session_id: String,
        payload: TrafficOut,
    },
    SubmitStreamResult {
        sender: AccAddress,
        session_id: String,
        result: StreamResult,
    },
    /// Several messages from the same sender executed in order
    Batch {
        sender: AccAddress,
        messages: Vec<Msg>,
    },
}

impl Msg {
    pub fn sender(&self) -> &AccAddress {
        match self {
            Msg::StartKeygen { sender, .. }
            | Msg::SubmitPubKey { sender, .. }
            | Msg::SubmitSignature { sender, .. }
            | Msg::RotateKey { sender, .. }
            | Msg::KeygenOptOut { sender }
            | Msg::KeygenOptIn { sender }
            | Msg::ProcessKeygenTraffic { sender, .. }
            | Msg::ProcessSignTraffic { sender, .. }
            | Msg::SubmitStreamResult { sender, .. }
            | Msg::Batch { sender, .. } => sender,
        }
    }

    /// Replace the sender, recursively for batches
    pub fn with_sender(mut self, new_sender: &AccAddress) -> Self {
        match &mut self {
            Msg::Batch { sender, messages } => {
                *sender = new_sender.clone();
                let inner = std::mem::take(messages);
                *messages = inner.into_iter().map(|m| m.with_sender(new_sender)).collect();
            }
            Msg::StartKeygen { sender, .. }
            | Msg::SubmitPubKey { sender, .. }
            | Msg::SubmitSignature { sender, .. }
            | Msg::RotateKey { sender, .. }
            | Msg::KeygenOptOut { sender }
            | Msg::KeygenOptIn { sender }
            | Msg::ProcessKeygenTraffic { sender, .. }
            | Msg::ProcessSignTraffic { sender, .. }
            | Msg::SubmitStreamResult { sender, .. } => *sender = new_sender.clone(),
        }
        self
    }

    /// Stateless checks, applied before a message touches any state
    pub fn validate_basic(&self) -> Result<()> {
        self.sender()
            .validate_basic()
            .map_err(|e| QuorumError::Validation(format!("invalid sender: {}", e)))?;

        match self {
            Msg::StartKeygen { key_id, .. } => key_id.validate_basic(),
            Msg::SubmitPubKey {
                key_id,
                pub_key,
                signature,
                ..
            } => {
                key_id.validate_basic()?;
                pub_key.validate_basic()?;
                signature.validate_basic()
            }
            Msg::SubmitSignature { signature, .. } => signature.validate_basic(),
            Msg::RotateKey { chain, key_id, .. } => {
                chain.validate_basic()?;
                key_id.validate_basic()
            }
            Msg::KeygenOptOut { .. } | Msg::KeygenOptIn { .. } => Ok(()),
            Msg::ProcessKeygenTraffic {
                session_id,
                payload,
                ..
            }
            | Msg::ProcessSignTraffic {
                session_id,
                payload,
                ..
            } => {
                validate_string(session_id)?;
                if payload.payload.is_empty() {
                    return Err(QuorumError::Validation(
                        "traffic payload must not be empty".to_string(),
                    ));
                }
                if !payload.is_broadcast {
                    validate_string(&payload.to_party_uid)?;
                }
                Ok(())
            }
            Msg::SubmitStreamResult { session_id, .. } => validate_string(session_id),
            Msg::Batch { sender, messages } => {
                if messages.is_empty() {
                    return Err(QuorumError::Validation("batch must not be empty".to_string()));
                }
                if messages.len() > MAX_BATCH_SIZE {
                    return Err(QuorumError::Validation(format!(
                        "batch size {} exceeds limit {}",
                        messages.len(),
                        MAX_BATCH_SIZE
                    )));
                }
                for (i, msg) in messages.iter().enumerate() {
                    if matches!(msg, Msg::Batch { .. }) {
                        return Err(QuorumError::Validation(format!(
                            "message {} of batch is a nested batch",
                            i
                        )));
                    }
                    if msg.sender() != sender {
                        return Err(QuorumError::Validation(format!(
                            "message {} of batch has a different sender",
                            i
                        )));
                    }
                    msg.validate_basic().map_err(|e| {
                        QuorumError::Validation(format!("message {} of batch: {}", i, e))
                    })?;
                }
                Ok(())
            }
        }
    }

    /// Number of top-level operations this message carries
    pub fn len(&self) -> usize {
        match self {
            Msg::Batch { messages, .. } => messages.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
