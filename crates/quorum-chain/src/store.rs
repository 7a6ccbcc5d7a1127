//! In-memory ordered store backing the keeper
//!
//! Everything lives in `BTreeMap`/`BTreeSet` so iteration order is
//! deterministic. While a savepoint is open every write records how to undo
//! it, so rolling back costs as much as the writes made since the
//! savepoint, not a copy of the whole state.

use std::collections::{BTreeMap, BTreeSet};

use quorum_core::{AccAddress, ChainName, Key, KeyEpoch, KeyId, KeygenSession, SigningSession};

/// Prior value of one written entry
#[derive(Debug, Clone)]
enum Undo {
    KeygenSession(String, Option<KeygenSession>),
    Key(String, Option<Key>),
    SigningSession(u64, Option<SigningSession>),
    NextSigId(u64),
    KeyEpoch((String, u64), Option<KeyEpoch>),
    RotationCount(String, Option<u64>),
    OptOut(AccAddress, bool),
}

/// Handle of an open savepoint, see [`State::begin`]
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct Savepoint(usize);

/// Keeper state
#[derive(Debug, Clone, Default)]
pub struct State {
    /// Keygen sessions by lower-cased key ID
    keygen_sessions: BTreeMap<String, KeygenSession>,
    /// (effective expiry, lower-cased key ID)
    keygen_expiry: BTreeSet<(u64, String)>,

    /// Generated keys by lower-cased key ID
    keys: BTreeMap<String, Key>,

    signing_sessions: BTreeMap<u64, SigningSession>,
    /// (effective expiry, sig ID)
    signing_expiry: BTreeSet<(u64, u64)>,
    next_sig_id: u64,

    /// (lower-cased chain, epoch) -> key epoch
    key_epochs: BTreeMap<(String, u64), KeyEpoch>,
    /// Lower-cased chain -> number of rotations so far
    rotation_counts: BTreeMap<String, u64>,

    opted_out: BTreeSet<AccAddress>,

    journal: Vec<Undo>,
    /// Journal length at each open savepoint, innermost last
    savepoints: Vec<usize>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- savepoints ----

    /// Open a savepoint; savepoints nest
    pub fn begin(&mut self) -> Savepoint {
        self.savepoints.push(self.journal.len());
        Savepoint(self.savepoints.len())
    }

    /// Keep every write made since `savepoint`
    ///
    /// Inside an outer savepoint the writes stay undoable by it.
    pub fn commit(&mut self, savepoint: Savepoint) {
        self.close(savepoint);
        if self.savepoints.is_empty() {
            self.journal.clear();
        }
    }

    /// Undo every write made since `savepoint`
    pub fn rollback(&mut self, savepoint: Savepoint) {
        let mark = self.close(savepoint);
        while self.journal.len() > mark {
            if let Some(undo) = self.journal.pop() {
                self.apply(undo);
            }
        }
    }

    fn close(&mut self, savepoint: Savepoint) -> usize {
        debug_assert_eq!(
            savepoint.0,
            self.savepoints.len(),
            "savepoints must be closed innermost first"
        );
        self.savepoints.pop().unwrap_or(0)
    }

    fn record(&mut self, undo: impl FnOnce(&Self) -> Undo) {
        if !self.savepoints.is_empty() {
            let entry = undo(self);
            self.journal.push(entry);
        }
    }

    fn apply(&mut self, undo: Undo) {
        match undo {
            Undo::KeygenSession(index, session) => {
                self.remove_keygen_session(&index);
                if let Some(session) = session {
                    self.put_keygen_session(index, session);
                }
            }
            Undo::Key(index, key) => match key {
                Some(key) => {
                    self.keys.insert(index, key);
                }
                None => {
                    self.keys.remove(&index);
                }
            },
            Undo::SigningSession(id, session) => {
                self.remove_signing_session(id);
                if let Some(session) = session {
                    self.put_signing_session(session);
                }
            }
            Undo::NextSigId(id) => self.next_sig_id = id,
            Undo::KeyEpoch(index, epoch) => match epoch {
                Some(epoch) => {
                    self.key_epochs.insert(index, epoch);
                }
                None => {
                    self.key_epochs.remove(&index);
                }
            },
            Undo::RotationCount(chain, count) => match count {
                Some(count) => {
                    self.rotation_counts.insert(chain, count);
                }
                None => {
                    self.rotation_counts.remove(&chain);
                }
            },
            Undo::OptOut(participant, was_opted_out) => {
                if was_opted_out {
                    self.opted_out.insert(participant);
                } else {
                    self.opted_out.remove(&participant);
                }
            }
        }
    }

    // ---- keygen sessions ----

    pub fn keygen_session(&self, id: &KeyId) -> Option<&KeygenSession> {
        self.keygen_sessions.get(&id.index_key())
    }

    /// Insert or overwrite a keygen session, keeping the expiry index in step
    pub fn set_keygen_session(&mut self, session: KeygenSession) {
        let index = session.key_id().index_key();
        self.record(|s| Undo::KeygenSession(index.clone(), s.keygen_sessions.get(&index).cloned()));
        self.remove_keygen_session(&index);
        self.put_keygen_session(index, session);
    }

    pub fn delete_keygen_session(&mut self, id: &KeyId) -> Option<KeygenSession> {
        let index = id.index_key();
        self.record(|s| Undo::KeygenSession(index.clone(), s.keygen_sessions.get(&index).cloned()));
        self.remove_keygen_session(&index)
    }

    fn put_keygen_session(&mut self, index: String, session: KeygenSession) {
        self.keygen_expiry
            .insert((session.effective_expiry(), index.clone()));
        self.keygen_sessions.insert(index, session);
    }

    fn remove_keygen_session(&mut self, index: &str) -> Option<KeygenSession> {
        let session = self.keygen_sessions.remove(index)?;
        self.keygen_expiry
            .remove(&(session.effective_expiry(), index.to_string()));
        Some(session)
    }

    /// Keygen sessions whose effective expiry is exactly `height`
    pub fn keygen_sessions_expiring_at(&self, height: u64) -> Vec<KeygenSession> {
        self.keygen_expiry
            .range((height, String::new())..(height.saturating_add(1), String::new()))
            .filter_map(|(_, index)| self.keygen_sessions.get(index).cloned())
            .collect()
    }

    pub fn keygen_session_count(&self) -> usize {
        self.keygen_sessions.len()
    }

    // ---- keys ----

    pub fn key(&self, id: &KeyId) -> Option<&Key> {
        self.keys.get(&id.index_key())
    }

    pub fn set_key(&mut self, key: Key) {
        let index = key.id.index_key();
        self.record(|s| Undo::Key(index.clone(), s.keys.get(&index).cloned()));
        self.keys.insert(index, key);
    }

    // ---- signing sessions ----

    pub fn signing_session(&self, id: u64) -> Option<&SigningSession> {
        self.signing_sessions.get(&id)
    }

    /// Insert or overwrite a signing session, keeping the expiry index in step
    pub fn set_signing_session(&mut self, session: SigningSession) {
        let id = session.id;
        self.record(|s| Undo::SigningSession(id, s.signing_sessions.get(&id).cloned()));
        self.remove_signing_session(id);
        self.put_signing_session(session);
    }

    pub fn delete_signing_session(&mut self, id: u64) -> Option<SigningSession> {
        self.record(|s| Undo::SigningSession(id, s.signing_sessions.get(&id).cloned()));
        self.remove_signing_session(id)
    }

    fn put_signing_session(&mut self, session: SigningSession) {
        self.signing_expiry
            .insert((session.effective_expiry(), session.id));
        self.signing_sessions.insert(session.id, session);
    }

    fn remove_signing_session(&mut self, id: u64) -> Option<SigningSession> {
        let session = self.signing_sessions.remove(&id)?;
        self.signing_expiry
            .remove(&(session.effective_expiry(), id));
        Some(session)
    }

    /// Signing sessions whose effective expiry is exactly `height`
    pub fn signing_sessions_expiring_at(&self, height: u64) -> Vec<SigningSession> {
        self.signing_expiry
            .range((height, 0)..=(height, u64::MAX))
            .filter_map(|(_, id)| self.signing_sessions.get(id).cloned())
            .collect()
    }

    pub fn signing_session_count(&self) -> usize {
        self.signing_sessions.len()
    }

    /// ID the next signing session will get
    pub fn peek_sig_id(&self) -> u64 {
        self.next_sig_id
    }

    /// Hand out the next signing session ID
    pub fn next_sig_id(&mut self) -> u64 {
        self.record(|s| Undo::NextSigId(s.next_sig_id));
        let id = self.next_sig_id;
        self.next_sig_id += 1;
        id
    }

    // ---- rotation ----

    pub fn key_epoch(&self, chain: &ChainName, epoch: u64) -> Option<&KeyEpoch> {
        self.key_epochs.get(&(chain.index_key(), epoch))
    }

    pub fn set_key_epoch(&mut self, key_epoch: KeyEpoch) {
        let index = (key_epoch.chain.index_key(), key_epoch.epoch);
        self.record(|s| Undo::KeyEpoch(index.clone(), s.key_epochs.get(&index).cloned()));
        self.key_epochs.insert(index, key_epoch);
    }

    pub fn rotation_count(&self, chain: &ChainName) -> u64 {
        self.rotation_counts
            .get(&chain.index_key())
            .copied()
            .unwrap_or(0)
    }

    pub fn set_rotation_count(&mut self, chain: &ChainName, count: u64) {
        let index = chain.index_key();
        self.record(|s| Undo::RotationCount(index.clone(), s.rotation_counts.get(&index).copied()));
        self.rotation_counts.insert(index, count);
    }

    // ---- keygen opt-out ----

    pub fn has_opted_out(&self, participant: &AccAddress) -> bool {
        self.opted_out.contains(participant)
    }

    pub fn set_opt_out(&mut self, participant: &AccAddress) {
        self.record(|s| Undo::OptOut(participant.clone(), s.opted_out.contains(participant)));
        self.opted_out.insert(participant.clone());
    }

    pub fn delete_opt_out(&mut self, participant: &AccAddress) {
        self.record(|s| Undo::OptOut(participant.clone(), s.opted_out.contains(participant)));
        self.opted_out.remove(participant);
    }
}
