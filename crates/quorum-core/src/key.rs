//! Generated keys and their rotation epochs

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::error::{QuorumError, Result};
use crate::snapshot::Snapshot;
use crate::threshold::Threshold;
use crate::types::{ChainName, KeyId, ValAddress};

/// Lifecycle state of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyState {
    /// Still being generated inside a keygen session
    Pending,
    /// Generated, not (or no longer) used by any chain
    Inactive,
    /// Scheduled as the next key of a chain
    Assigned,
    /// Current or recent key of a chain, usable for signing
    Active,
}

impl std::fmt::Display for KeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            KeyState::Pending => "pending",
            KeyState::Inactive => "inactive",
            KeyState::Assigned => "assigned",
            KeyState::Active => "active",
        };
        f.write_str(s)
    }
}

/// A key shared by the participants of its snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub id: KeyId,
    pub snapshot: Snapshot,
    pub pub_keys: BTreeMap<ValAddress, PublicKey>,
    pub signing_threshold: Threshold,
    pub state: KeyState,
}

impl Key {
    /// Participants that submitted a public key, in ascending address order
    pub fn participants(&self) -> Vec<ValAddress> {
        self.pub_keys.keys().cloned().collect()
    }

    /// Total snapshot weight of all participants that submitted a public key
    pub fn participants_weight(&self) -> u128 {
        self.pub_keys
            .keys()
            .map(|p| self.snapshot.participant_weight(p) as u128)
            .sum()
    }

    /// Weight needed for a signature of this key to be complete
    pub fn min_passing_weight(&self) -> u64 {
        self.snapshot.min_passing_weight(&self.signing_threshold)
    }

    pub fn pub_key(&self, participant: &ValAddress) -> Option<&PublicKey> {
        self.pub_keys.get(participant)
    }

    pub fn weight(&self, participant: &ValAddress) -> u64 {
        self.snapshot.participant_weight(participant)
    }

    pub fn bonded_weight(&self) -> u64 {
        self.snapshot.bonded_weight
    }

    /// Validation of a fully generated key
    pub fn validate_basic(&self) -> Result<()> {
        self.validate_pending()?;

        if self.participants_weight() < self.min_passing_weight() as u128 {
            return Err(QuorumError::Validation(
                "invalid signing threshold".to_string(),
            ));
        }

        Ok(())
    }

    /// Validation that also holds while the key is still being generated
    pub fn validate_pending(&self) -> Result<()> {
        self.id.validate_basic()?;
        self.snapshot.validate_basic()?;
        self.signing_threshold.validate()?;

        let mut seen = HashSet::with_capacity(self.pub_keys.len());
        for (participant, pub_key) in &self.pub_keys {
            if !seen.insert(pub_key) {
                return Err(QuorumError::Validation(
                    "duplicate public key seen".to_string(),
                ));
            }

            participant.validate_basic()?;
            pub_key.validate_basic()?;

            if self.snapshot.participant_weight(participant) == 0 {
                return Err(QuorumError::Validation(
                    "invalid participant with public key submitted".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Binds a key to one rotation epoch of a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEpoch {
    pub epoch: u64,
    pub chain: ChainName,
    pub key_id: KeyId,
}

impl KeyEpoch {
    pub fn new(epoch: u64, chain: ChainName, key_id: KeyId) -> Self {
        Self {
            epoch,
            chain,
            key_id,
        }
    }
}
