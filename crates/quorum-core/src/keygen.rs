//! Keygen session state machine
//!
//! A keygen session collects one public key share per participant. It becomes
//! `Completed` as soon as the submitted weight reaches the keygen threshold, and
//! keeps accepting late submissions for `grace_period` blocks after that.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::error::{QuorumError, Result, SessionKind};
use crate::key::{Key, KeyState};
use crate::snapshot::Snapshot;
use crate::threshold::Threshold;
use crate::types::{KeyId, ValAddress};

/// State shared by keygen and signing sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Pending,
    Completed,
}

/// Height at which a session leaves the store
///
/// Completed sessions are collected the block after their grace period ends,
/// unless the hard expiry comes first.
pub fn effective_expiry(
    state: SessionState,
    expires_at: u64,
    completed_at: u64,
    grace_period: u64,
) -> u64 {
    match state {
        SessionState::Pending => expires_at,
        SessionState::Completed => {
            expires_at.min(completed_at.saturating_add(grace_period).saturating_add(1))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeygenSession {
    pub key: Key,
    pub state: SessionState,
    pub keygen_threshold: Threshold,
    pub expires_at: u64,
    pub completed_at: u64,
    pub grace_period: u64,
}

impl KeygenSession {
    pub fn new(
        id: KeyId,
        keygen_threshold: Threshold,
        signing_threshold: Threshold,
        snapshot: Snapshot,
        expires_at: u64,
        grace_period: u64,
    ) -> Self {
        Self {
            key: Key {
                id,
                snapshot,
                pub_keys: BTreeMap::new(),
                signing_threshold,
                state: KeyState::Pending,
            },
            state: SessionState::Pending,
            keygen_threshold,
            expires_at,
            completed_at: 0,
            grace_period,
        }
    }

    pub fn key_id(&self) -> &KeyId {
        &self.key.id
    }

    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }

    pub fn validate_basic(&self) -> Result<()> {
        self.keygen_threshold.validate()?;

        if self.keygen_threshold.less_than(&self.key.signing_threshold) {
            return Err(QuorumError::Validation(
                "keygen threshold must be >=signing threshold".to_string(),
            ));
        }

        if self.expires_at == 0 {
            return Err(QuorumError::Validation(
                "expires at must be >0".to_string(),
            ));
        }

        if self.completed_at >= self.expires_at {
            return Err(QuorumError::Validation(
                "completed at must be < expires at".to_string(),
            ));
        }

        match self.state {
            SessionState::Pending => {
                if self.completed_at != 0 {
                    return Err(QuorumError::Validation(
                        "pending keygen session must not have completed at set".to_string(),
                    ));
                }
                self.key.validate_pending()
            }
            SessionState::Completed => {
                if self.completed_at == 0 {
                    return Err(QuorumError::Validation(
                        "completed keygen session must have completed at set".to_string(),
                    ));
                }
                self.key.validate_basic()
            }
        }
    }

    /// Record `participant`'s public key share
    ///
    /// Nothing is mutated when an error is returned.
    pub fn add_key(
        &mut self,
        block_height: u64,
        participant: &ValAddress,
        pub_key: PublicKey,
    ) -> Result<()> {
        if self.is_expired(block_height) {
            return Err(QuorumError::Expired {
                kind: SessionKind::Keygen,
                id: self.key.id.to_string(),
            });
        }

        if self.key.snapshot.participant_weight(participant) == 0 {
            return Err(QuorumError::NotParticipant {
                kind: SessionKind::Keygen,
                id: self.key.id.to_string(),
                participant: participant.to_string(),
            });
        }

        if self.key.pub_keys.contains_key(participant) {
            return Err(QuorumError::DuplicateSubmission {
                kind: SessionKind::Keygen,
                id: self.key.id.to_string(),
                participant: participant.to_string(),
            });
        }

        if self.key.pub_keys.values().any(|k| *k == pub_key) {
            return Err(QuorumError::DuplicatePublicKey);
        }

        if self.is_completed() && !self.is_within_grace_period(block_height) {
            return Err(QuorumError::Closed {
                kind: SessionKind::Keygen,
                id: self.key.id.to_string(),
            });
        }

        self.key.pub_keys.insert(participant.clone(), pub_key);

        let min_passing_weight = self.key.snapshot.min_passing_weight(&self.keygen_threshold);
        if !self.is_completed() && self.key.participants_weight() >= min_passing_weight as u128 {
            self.completed_at = block_height;
            self.state = SessionState::Completed;
        }

        Ok(())
    }

    /// Participants that have not submitted a public key
    pub fn missing_participants(&self) -> Vec<ValAddress> {
        self.key
            .snapshot
            .participant_addresses()
            .into_iter()
            .filter(|p| !self.key.pub_keys.contains_key(p))
            .collect()
    }

    /// The generated key, once the session has completed
    pub fn result(&self) -> Result<Key> {
        if !self.is_completed() {
            return Err(QuorumError::NotCompleted {
                kind: SessionKind::Keygen,
                id: self.key.id.to_string(),
            });
        }

        let mut key = self.key.clone();
        key.state = KeyState::Inactive;
        key.validate_basic()?;

        Ok(key)
    }

    pub fn effective_expiry(&self) -> u64 {
        effective_expiry(
            self.state,
            self.expires_at,
            self.completed_at,
            self.grace_period,
        )
    }

    fn is_within_grace_period(&self, block_height: u64) -> bool {
        block_height <= self.completed_at.saturating_add(self.grace_period)
    }

    fn is_expired(&self, block_height: u64) -> bool {
        block_height >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Participant;
    use chrono::Utc;
    use k256::ecdsa::SigningKey;
    use k256::elliptic_curve::sec1::ToEncodedPoint;

    fn addr(i: u8) -> ValAddress {
        ValAddress::new(vec![i])
    }

    fn pub_key(seed: u8) -> PublicKey {
        let sk = SigningKey::from_slice(&[seed; 32]).unwrap();
        PublicKey::from_slice(sk.verifying_key().to_encoded_point(true).as_bytes()).unwrap()
    }

    fn session() -> KeygenSession {
        let snapshot = Snapshot::new(
            Utc::now(),
            1,
            vec![
                Participant::new(addr(1), 1),
                Participant::new(addr(2), 2),
                Participant::new(addr(3), 3),
            ],
            6,
        );
        KeygenSession::new(
            KeyId::new("key-1"),
            Threshold::new(2, 3),
            Threshold::new(1, 2),
            snapshot,
            10,
            2,
        )
    }

    #[test]
    fn test_completes_when_weight_reached() {
        let mut s = session();
        s.add_key(1, &addr(3), pub_key(3)).unwrap();
        assert_eq!(s.state, SessionState::Pending);
        s.add_key(2, &addr(2), pub_key(2)).unwrap();
        assert_eq!(s.state, SessionState::Completed);
        assert_eq!(s.completed_at, 2);
        assert!(s.validate_basic().is_ok());

        let key = s.result().unwrap();
        assert_eq!(key.state, KeyState::Inactive);
        assert_eq!(s.missing_participants(), vec![addr(1)]);
    }

    #[test]
    fn test_rejects_expired_and_mutates_nothing() {
        let mut s = session();
        let before = s.clone();
        let err = s.add_key(10, &addr(1), pub_key(1)).unwrap_err();
        assert!(matches!(err, QuorumError::Expired { .. }));
        assert_eq!(s, before);
    }

    #[test]
    fn test_rejects_non_participant() {
        let mut s = session();
        let err = s.add_key(1, &addr(9), pub_key(9)).unwrap_err();
        assert!(matches!(err, QuorumError::NotParticipant { .. }));
    }

    #[test]
    fn test_rejects_duplicates() {
        let mut s = session();
        s.add_key(1, &addr(1), pub_key(1)).unwrap();
        assert!(matches!(
            s.add_key(1, &addr(1), pub_key(5)).unwrap_err(),
            QuorumError::DuplicateSubmission { .. }
        ));
        assert_eq!(
            s.add_key(1, &addr(2), pub_key(1)).unwrap_err(),
            QuorumError::DuplicatePublicKey
        );
    }

    #[test]
    fn test_grace_period_then_closed() {
        let mut s = session();
        s.add_key(1, &addr(3), pub_key(3)).unwrap();
        s.add_key(1, &addr(2), pub_key(2)).unwrap();
        assert_eq!(s.effective_expiry(), 4);

        let mut late = s.clone();
        late.add_key(3, &addr(1), pub_key(1)).unwrap();

        let err = s.add_key(4, &addr(1), pub_key(1)).unwrap_err();
        assert!(matches!(err, QuorumError::Closed { .. }));
    }

    #[test]
    fn test_result_requires_completion() {
        let s = session();
        assert!(matches!(
            s.result().unwrap_err(),
            QuorumError::NotCompleted { .. }
        ));
        assert_eq!(s.effective_expiry(), 10);
    }
}
