//! Signing session state machine
//!
//! Mirrors the keygen session for signature shares. Unlike public keys, a bad
//! signature share is attributable, so every share is verified against the
//! participant's registered public key before it can count toward quorum.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::crypto::Signature;
use crate::error::{QuorumError, Result, SessionKind};
use crate::key::Key;
use crate::keygen::{effective_expiry, SessionState};
use crate::types::{ChainName, Hash, KeyId, ValAddress};

/// Modules that may request signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RequesterModule {
    /// External EVM chain command batches
    Evm,
    /// Cross-chain transfer routing
    Nexus,
}

impl std::fmt::Display for RequesterModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequesterModule::Evm => write!(f, "evm"),
            RequesterModule::Nexus => write!(f, "nexus"),
        }
    }
}

/// Requester payload attached to a signing session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "module", rename_all = "snake_case")]
pub enum ModuleMetadata {
    Evm {
        chain: ChainName,
        command_batch_id: Hash,
    },
    Nexus {
        transfer_id: u64,
    },
}

impl ModuleMetadata {
    /// The module this payload belongs to
    pub fn module(&self) -> RequesterModule {
        match self {
            ModuleMetadata::Evm { .. } => RequesterModule::Evm,
            ModuleMetadata::Nexus { .. } => RequesterModule::Nexus,
        }
    }
}

/// Aggregated signature shares of one signing session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiSig {
    pub id: u64,
    pub key_id: KeyId,
    pub payload_hash: Hash,
    pub sigs: BTreeMap<ValAddress, Signature>,
}

impl MultiSig {
    pub fn validate_basic(&self) -> Result<()> {
        self.key_id.validate_basic()?;
        self.payload_hash.validate_basic()?;

        let mut seen = HashSet::with_capacity(self.sigs.len());
        for (participant, sig) in &self.sigs {
            if !seen.insert(sig) {
                return Err(QuorumError::Validation(
                    "duplicate signature seen".to_string(),
                ));
            }
            participant.validate_basic()?;
            sig.validate_basic()?;
        }

        Ok(())
    }

    pub fn signature(&self, participant: &ValAddress) -> Option<&Signature> {
        self.sigs.get(participant)
    }

    /// Participants whose shares are included, in ascending address order
    pub fn participants(&self) -> Vec<ValAddress> {
        self.sigs.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningSession {
    pub id: u64,
    pub multi_sig: MultiSig,
    pub state: SessionState,
    pub key: Key,
    pub expires_at: u64,
    pub completed_at: u64,
    pub grace_period: u64,
    pub module: RequesterModule,
    pub metadata: Option<ModuleMetadata>,
}

impl SigningSession {
    pub fn new(
        id: u64,
        key: Key,
        payload_hash: Hash,
        expires_at: u64,
        grace_period: u64,
        module: RequesterModule,
        metadata: Option<ModuleMetadata>,
    ) -> Self {
        Self {
            id,
            multi_sig: MultiSig {
                id,
                key_id: key.id.clone(),
                payload_hash,
                sigs: BTreeMap::new(),
            },
            state: SessionState::Pending,
            key,
            expires_at,
            completed_at: 0,
            grace_period,
            module,
            metadata,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }

    pub fn validate_basic(&self) -> Result<()> {
        self.multi_sig.validate_basic()?;
        self.key.validate_basic()?;

        if self.key.id != self.multi_sig.key_id {
            return Err(QuorumError::Validation("key ID mismatch".to_string()));
        }

        if self.expires_at == 0 {
            return Err(QuorumError::Validation(
                "expires at must be >0".to_string(),
            ));
        }

        if let Some(metadata) = &self.metadata {
            if metadata.module() != self.module {
                return Err(QuorumError::Validation(format!(
                    "metadata of module {} attached to a {} signing session",
                    metadata.module(),
                    self.module
                )));
            }
        }

        match self.state {
            SessionState::Pending => {
                if self.completed_at != 0 {
                    return Err(QuorumError::Validation(
                        "pending signing session must not have completed at set".to_string(),
                    ));
                }
            }
            SessionState::Completed => {
                if self.completed_at == 0 {
                    return Err(QuorumError::Validation(
                        "completed signing session must have completed at set".to_string(),
                    ));
                }
                if self.participants_weight() < self.key.min_passing_weight() as u128 {
                    return Err(QuorumError::Validation(
                        "completed signing session must have completed multi signature"
                            .to_string(),
                    ));
                }
            }
        }

        for (participant, sig) in &self.multi_sig.sigs {
            let pub_key = self.key.pub_key(participant).ok_or_else(|| {
                QuorumError::Validation(format!(
                    "participant {} does not have public key submitted",
                    participant
                ))
            })?;
            pub_key
                .verify_hash(&self.multi_sig.payload_hash, sig)
                .map_err(|_| {
                    QuorumError::Validation("signature does not match the public key".to_string())
                })?;
        }

        Ok(())
    }

    /// Record `participant`'s signature share after verifying it
    ///
    /// Nothing is mutated when an error is returned.
    pub fn add_sig(
        &mut self,
        block_height: u64,
        participant: &ValAddress,
        sig: Signature,
    ) -> Result<()> {
        if self.is_expired(block_height) {
            return Err(QuorumError::Expired {
                kind: SessionKind::Signing,
                id: self.id.to_string(),
            });
        }

        let pub_key = match self.key.pub_key(participant) {
            Some(pub_key) if self.key.weight(participant) > 0 => *pub_key,
            _ => {
                return Err(QuorumError::NotParticipant {
                    kind: SessionKind::Signing,
                    id: self.id.to_string(),
                    participant: participant.to_string(),
                })
            }
        };

        if self.multi_sig.sigs.contains_key(participant) {
            return Err(QuorumError::DuplicateSubmission {
                kind: SessionKind::Signing,
                id: self.id.to_string(),
                participant: participant.to_string(),
            });
        }

        if self.is_completed() && !self.is_within_grace_period(block_height) {
            return Err(QuorumError::Closed {
                kind: SessionKind::Signing,
                id: self.id.to_string(),
            });
        }

        pub_key.verify_hash(&self.multi_sig.payload_hash, &sig)?;

        self.multi_sig.sigs.insert(participant.clone(), sig);

        if !self.is_completed() && self.participants_weight() >= self.key.min_passing_weight() as u128
        {
            self.completed_at = block_height;
            self.state = SessionState::Completed;
        }

        Ok(())
    }

    /// Participants of the key that have not submitted a signature
    pub fn missing_participants(&self) -> Vec<ValAddress> {
        self.key
            .participants()
            .into_iter()
            .filter(|p| !self.multi_sig.sigs.contains_key(p))
            .collect()
    }

    /// The aggregated signature, once the session has completed
    pub fn result(&self) -> Result<MultiSig> {
        if !self.is_completed() {
            return Err(QuorumError::NotCompleted {
                kind: SessionKind::Signing,
                id: self.id.to_string(),
            });
        }

        self.multi_sig.validate_basic()?;
        Ok(self.multi_sig.clone())
    }

    pub fn effective_expiry(&self) -> u64 {
        effective_expiry(
            self.state,
            self.expires_at,
            self.completed_at,
            self.grace_period,
        )
    }

    fn participants_weight(&self) -> u128 {
        self.multi_sig
            .sigs
            .keys()
            .map(|p| self.key.weight(p) as u128)
            .sum()
    }

    fn is_within_grace_period(&self, block_height: u64) -> bool {
        block_height <= self.completed_at.saturating_add(self.grace_period)
    }

    fn is_expired(&self, block_height: u64) -> bool {
        block_height >= self.expires_at
    }
}
