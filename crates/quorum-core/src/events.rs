//! Events emitted by the ceremony store

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::{PublicKey, Signature};
use crate::msg::{StreamResult, TrafficOut};
use crate::signing::RequesterModule;
use crate::types::{AccAddress, ChainName, Hash, KeyId, ValAddress};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    KeygenStarted {
        key_id: KeyId,
        participants: Vec<ValAddress>,
        /// Number of key shares each participant generates, aligned with `participants`
        share_counts: Vec<u32>,
        expires_at: u64,
    },
    PubKeySubmitted {
        key_id: KeyId,
        participant: ValAddress,
        pub_key: PublicKey,
    },
    KeygenCompleted {
        key_id: KeyId,
    },
    KeygenExpired {
        key_id: KeyId,
    },
    SigningStarted {
        sig_id: u64,
        key_id: KeyId,
        payload_hash: Hash,
        module: RequesterModule,
        pub_keys: BTreeMap<ValAddress, PublicKey>,
        expires_at: u64,
    },
    SignatureSubmitted {
        sig_id: u64,
        participant: ValAddress,
        signature: Signature,
    },
    SigningCompleted {
        sig_id: u64,
    },
    SigningExpired {
        sig_id: u64,
    },
    KeyAssigned {
        chain: ChainName,
        key_id: KeyId,
    },
    KeyRotated {
        chain: ChainName,
        key_id: KeyId,
    },
    KeygenOptOut {
        participant: AccAddress,
    },
    KeygenOptIn {
        participant: AccAddress,
    },
    /// Intermediate protocol message of a streamed keygen, relayed to all participants
    KeygenTraffic {
        session_id: String,
        from: ValAddress,
        payload: TrafficOut,
    },
    /// Intermediate protocol message of a streamed signing, relayed to all participants
    SignTraffic {
        session_id: String,
        from: ValAddress,
        payload: TrafficOut,
    },
    /// A participant reported the terminal result of a streamed ceremony
    StreamResultSubmitted {
        session_id: String,
        voter: ValAddress,
        result: StreamResult,
    },
}

impl Event {
    /// Short event name used for subscription filters and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Event::KeygenStarted { .. } => "keygen_started",
            Event::PubKeySubmitted { .. } => "pub_key_submitted",
            Event::KeygenCompleted { .. } => "keygen_completed",
            Event::KeygenExpired { .. } => "keygen_expired",
            Event::SigningStarted { .. } => "signing_started",
            Event::SignatureSubmitted { .. } => "signature_submitted",
            Event::SigningCompleted { .. } => "signing_completed",
            Event::SigningExpired { .. } => "signing_expired",
            Event::KeyAssigned { .. } => "key_assigned",
            Event::KeyRotated { .. } => "key_rotated",
            Event::KeygenOptOut { .. } => "keygen_opt_out",
            Event::KeygenOptIn { .. } => "keygen_opt_in",
            Event::KeygenTraffic { .. } => "keygen_traffic",
            Event::SignTraffic { .. } => "sign_traffic",
            Event::StreamResultSubmitted { .. } => "stream_result_submitted",
        }
    }
}
