//! Participant snapshots
//!
//! A snapshot is taken once when a ceremony starts and never changes afterwards.
//! It fixes who may contribute to the ceremony and with what weight.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{QuorumError, Result};
use crate::threshold::Threshold;
use crate::types::ValAddress;

/// A validator and its weight in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub address: ValAddress,
    pub weight: u64,
}

impl Participant {
    pub fn new(address: ValAddress, weight: u64) -> Self {
        Self { address, weight }
    }
}

/// Immutable, ceremony-scoped capture of participants and weights
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub height: u64,
    pub participants: BTreeMap<ValAddress, Participant>,
    pub bonded_weight: u64,
}

impl Snapshot {
    pub fn new(
        timestamp: DateTime<Utc>,
        height: u64,
        participants: Vec<Participant>,
        bonded_weight: u64,
    ) -> Self {
        Self {
            timestamp,
            height,
            participants: participants
                .into_iter()
                .map(|p| (p.address.clone(), p))
                .collect(),
            bonded_weight,
        }
    }

    pub fn validate_basic(&self) -> Result<()> {
        if self.participants.is_empty() {
            return Err(QuorumError::Validation(
                "snapshot cannot have no participant".to_string(),
            ));
        }

        if self.bonded_weight == 0 {
            return Err(QuorumError::Validation(
                "snapshot must have bonded weight >0".to_string(),
            ));
        }

        if self.height == 0 {
            return Err(QuorumError::Validation(
                "snapshot must have height >0".to_string(),
            ));
        }

        if self.timestamp.timestamp() <= 0 {
            return Err(QuorumError::Validation(
                "snapshot must have timestamp >0".to_string(),
            ));
        }

        for (address, participant) in &self.participants {
            participant.address.validate_basic()?;
            if *address != participant.address {
                return Err(QuorumError::Validation("invalid snapshot".to_string()));
            }
        }

        if self.participants_weight() > self.bonded_weight as u128 {
            return Err(QuorumError::Validation(
                "snapshot cannot have sum of participants weight greater than bonded weight"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Participant addresses in ascending byte order
    pub fn participant_addresses(&self) -> Vec<ValAddress> {
        self.participants.keys().cloned().collect()
    }

    /// Sum of all participants' weights
    pub fn participants_weight(&self) -> u128 {
        self.participants.values().map(|p| p.weight as u128).sum()
    }

    /// Weight of the given validator, zero if it is not a participant
    pub fn participant_weight(&self, participant: &ValAddress) -> u64 {
        self.participants
            .get(participant)
            .map(|p| p.weight)
            .unwrap_or(0)
    }

    /// Minimum cumulative weight needed to pass `threshold` against the bonded weight
    pub fn min_passing_weight(&self, threshold: &Threshold) -> u64 {
        threshold.min_passing_weight(self.bonded_weight)
    }

    /// Index of the given validator in the participant ordering
    pub fn participant_index(&self, participant: &ValAddress) -> Option<usize> {
        self.participants.keys().position(|p| p == participant)
    }
}
