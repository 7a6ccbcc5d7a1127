//! Keygen session bookkeeping

use quorum_core::{AccAddress, Event, Key, KeyId, KeygenSession, PublicKey, Snapshot, ValAddress};
use tracing::info;

use super::Keeper;
use crate::context::BlockContext;
use crate::error::{ChainError, Result};

impl Keeper {
    /// Snapshot the eligible validators and open a keygen session for `key_id`
    ///
    /// Validators whose proxy opted out of keygen are left out of the snapshot.
    pub fn start_keygen(&mut self, ctx: &mut BlockContext, key_id: &KeyId) -> Result<()> {
        let state = &self.state;
        let snapshotter = &self.snapshotter;
        let filter = |validator: &ValAddress| {
            snapshotter
                .proxy(validator)
                .map_or(false, |proxy| !state.has_opted_out(&proxy))
        };

        let snapshot =
            self.snapshotter
                .create_snapshot(ctx, &filter, &self.params.keygen_threshold)?;

        self.create_keygen_session(ctx, key_id, snapshot)
    }

    /// Open a keygen session over an already captured snapshot
    pub fn create_keygen_session(
        &mut self,
        ctx: &mut BlockContext,
        key_id: &KeyId,
        snapshot: Snapshot,
    ) -> Result<()> {
        key_id.validate_basic()?;

        if self.state.keygen_session(key_id).is_some() {
            return Err(ChainError::Precondition(format!(
                "keygen for key ID {} already in progress",
                key_id
            )));
        }
        if self.state.key(key_id).is_some() {
            return Err(ChainError::Precondition(format!(
                "key {} already set",
                key_id
            )));
        }

        let expires_at = ctx.height + self.params.keygen_timeout;
        let session = KeygenSession::new(
            key_id.clone(),
            self.params.keygen_threshold,
            self.params.signing_threshold,
            snapshot,
            expires_at,
            self.params.keygen_grace_period,
        );
        session.validate_basic()?;

        let participants = session.key.snapshot.participant_addresses();
        info!(
            key_id = %key_id,
            participant_count = participants.len(),
            participants_weight = %session.key.snapshot.participants_weight(),
            bonded_weight = session.key.snapshot.bonded_weight,
            keygen_threshold = %self.params.keygen_threshold,
            signing_threshold = %self.params.signing_threshold,
            expires_at,
            "keygen session started"
        );

        ctx.emit(Event::KeygenStarted {
            key_id: key_id.clone(),
            share_counts: vec![1; participants.len()],
            participants,
            expires_at,
        });
        self.state.set_keygen_session(session);

        Ok(())
    }

    /// Record a participant's public key in the running keygen session
    pub fn add_pub_key(
        &mut self,
        ctx: &mut BlockContext,
        key_id: &KeyId,
        participant: &ValAddress,
        pub_key: PublicKey,
    ) -> Result<()> {
        let mut session = self
            .state
            .keygen_session(key_id)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("keygen session {}", key_id)))?;

        let was_completed = session.is_completed();
        session.add_key(ctx.height, participant, pub_key)?;

        if !was_completed && session.is_completed() {
            info!(
                key_id = %key_id,
                participants_weight = %session.key.participants_weight(),
                height = ctx.height,
                "keygen session reached quorum"
            );
        }

        ctx.emit(Event::PubKeySubmitted {
            key_id: session.key_id().clone(),
            participant: participant.clone(),
            pub_key,
        });
        self.state.set_keygen_session(session);

        Ok(())
    }

    /// Persist a generated key
    pub fn set_key(&mut self, ctx: &mut BlockContext, key: Key) {
        info!(key_id = %key.id, participant_count = key.pub_keys.len(), "key set");

        ctx.emit(Event::KeygenCompleted {
            key_id: key.id.clone(),
        });
        self.state.set_key(key);
    }

    /// Exclude the validator behind `proxy` from future keygens
    pub fn opt_out_of_keygen(&mut self, ctx: &mut BlockContext, proxy: &AccAddress) -> Result<()> {
        self.ensure_registered_proxy(proxy)?;

        self.state.set_opt_out(proxy);
        ctx.emit(Event::KeygenOptOut {
            participant: proxy.clone(),
        });
        Ok(())
    }

    pub fn opt_in_to_keygen(&mut self, ctx: &mut BlockContext, proxy: &AccAddress) -> Result<()> {
        self.ensure_registered_proxy(proxy)?;

        self.state.delete_opt_out(proxy);
        ctx.emit(Event::KeygenOptIn {
            participant: proxy.clone(),
        });
        Ok(())
    }

    pub fn has_opted_out(&self, proxy: &AccAddress) -> bool {
        self.state.has_opted_out(proxy)
    }

    /// Validator operator behind a proxy account
    pub(crate) fn ensure_registered_proxy(&self, proxy: &AccAddress) -> Result<ValAddress> {
        self.snapshotter
            .operator(proxy)
            .ok_or_else(|| ChainError::Unauthorized(format!("{} is not a registered proxy", proxy)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use quorum_core::{KeyState, SessionState};

    #[test]
    fn test_start_keygen_snapshots_all_validators() {
        let mut keeper = keeper();
        let mut ctx = ctx(10);

        keeper.start_keygen(&mut ctx, &KeyId::new("key-1")).unwrap();

        let session = keeper.keygen_session(&KeyId::new("KEY-1")).unwrap();
        assert_eq!(session.expires_at, 20);
        assert_eq!(session.key.state, KeyState::Pending);
        assert_eq!(session.key.snapshot.participants.len(), 3);

        match &ctx.events()[0] {
            Event::KeygenStarted {
                participants,
                share_counts,
                ..
            } => {
                assert_eq!(participants.len(), 3);
                assert_eq!(share_counts, &vec![1, 1, 1]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_start_keygen_rejects_reused_key_id() {
        let mut keeper = keeper();
        let mut ctx = ctx(10);

        keeper.start_keygen(&mut ctx, &KeyId::new("key-1")).unwrap();
        assert!(matches!(
            keeper.start_keygen(&mut ctx, &KeyId::new("Key-1")),
            Err(ChainError::Precondition(_))
        ));
    }

    #[test]
    fn test_opted_out_validator_excluded() {
        let mut keeper = keeper();
        let mut ctx = ctx(10);

        // weight 1 of 6 leaves 5/6, still above 80/100
        keeper.opt_out_of_keygen(&mut ctx, &proxy(1)).unwrap();
        keeper.start_keygen(&mut ctx, &KeyId::new("key-1")).unwrap();

        let session = keeper.keygen_session(&KeyId::new("key-1")).unwrap();
        assert_eq!(session.key.snapshot.participant_weight(&operator(1)), 0);

        // without validator 3 the remaining 3/6 cannot pass
        keeper.opt_in_to_keygen(&mut ctx, &proxy(1)).unwrap();
        keeper.opt_out_of_keygen(&mut ctx, &proxy(3)).unwrap();
        assert!(keeper.start_keygen(&mut ctx, &KeyId::new("key-2")).is_err());
    }

    #[test]
    fn test_opt_out_requires_registered_proxy() {
        let mut keeper = keeper();
        let result = keeper.opt_out_of_keygen(&mut ctx(1), &AccAddress::new(vec![0xee]));
        assert!(matches!(result, Err(ChainError::Unauthorized(_))));
    }

    #[test]
    fn test_add_pub_key_completes_session() {
        let mut keeper = keeper();
        let mut ctx = ctx(10);
        let key_id = KeyId::new("key-1");
        keeper.start_keygen(&mut ctx, &key_id).unwrap();

        // 80/100 of 6 needs weight 5
        keeper.add_pub_key(&mut ctx, &key_id, &operator(3), pub_key(3)).unwrap();
        keeper.add_pub_key(&mut ctx, &key_id, &operator(1), pub_key(1)).unwrap();
        assert_eq!(
            keeper.keygen_session(&key_id).unwrap().state,
            SessionState::Pending
        );

        keeper.add_pub_key(&mut ctx, &key_id, &operator(2), pub_key(2)).unwrap();
        assert_eq!(
            keeper.keygen_session(&key_id).unwrap().state,
            SessionState::Completed
        );
    }

    #[test]
    fn test_add_pub_key_unknown_session() {
        let mut keeper = keeper();
        let result = keeper.add_pub_key(&mut ctx(1), &KeyId::new("nope"), &operator(1), pub_key(1));
        assert!(matches!(result, Err(ChainError::NotFound(_))));
    }
}
