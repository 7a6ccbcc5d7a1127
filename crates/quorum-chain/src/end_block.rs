//! End-of-block finalization of keygen and signing sessions
//!
//! Sessions are collected one block before their effective expiry, so no
//! submission can reach a session that is about to be finalized. Each due
//! session is removed from the store first; the follow-up work (persisting
//! the key, notifying the requester, rewards, events) runs in its own
//! savepoint so a failing or panicking session cannot affect the others.
//! The rewarder sits outside that savepoint, so it is called last, once
//! nothing left in the finalization can fail.

use quorum_core::{Event, KeygenSession, SigningSession};
use tracing::{error, info};

use crate::context::BlockContext;
use crate::error::Result;
use crate::keeper::Keeper;

impl Keeper {
    pub fn end_block(&mut self, ctx: &mut BlockContext) {
        self.handle_keygens(ctx);
        self.handle_signings(ctx);
    }

    fn handle_keygens(&mut self, ctx: &mut BlockContext) {
        let due = self
            .state
            .keygen_sessions_expiring_at(ctx.height.saturating_add(1));

        for session in due {
            self.state.delete_keygen_session(session.key_id());

            if let Err(err) = self.run_cached(ctx, |k, ctx| k.finalize_keygen(ctx, &session)) {
                error!(key_id = %session.key_id(), error = %err, "failed to finalize keygen session");
            }
        }
    }

    fn finalize_keygen(&mut self, ctx: &mut BlockContext, session: &KeygenSession) -> Result<()> {
        if !session.is_completed() {
            info!(key_id = %session.key_id(), "keygen session expired");
            ctx.emit(Event::KeygenExpired {
                key_id: session.key_id().clone(),
            });

            for participant in session.missing_participants() {
                self.rewarder.clear_rewards(ctx, &participant);
            }
            return Ok(());
        }

        let key = session.result()?;
        let submitters = key.participants();
        self.set_key(ctx, key);

        for participant in &submitters {
            self.rewarder.release_rewards(ctx, participant);
        }
        Ok(())
    }

    fn handle_signings(&mut self, ctx: &mut BlockContext) {
        let due = self
            .state
            .signing_sessions_expiring_at(ctx.height.saturating_add(1));

        for session in due {
            self.state.delete_signing_session(session.id);

            if let Err(err) = self.run_cached(ctx, |k, ctx| k.finalize_signing(ctx, &session)) {
                error!(sig_id = session.id, module = %session.module, error = %err, "failed to finalize signing session");
            }
        }
    }

    fn finalize_signing(&mut self, ctx: &mut BlockContext, session: &SigningSession) -> Result<()> {
        let handler = self.router.handler(session.module).clone();

        if !session.is_completed() {
            info!(sig_id = session.id, module = %session.module, "signing session expired");
            handler.handle_failed(ctx, session.id, session.metadata.as_ref())?;
            ctx.emit(Event::SigningExpired { sig_id: session.id });

            for participant in session.missing_participants() {
                self.rewarder.clear_rewards(ctx, &participant);
            }
            return Ok(());
        }

        let multi_sig = session.result()?;
        handler.handle_completed(ctx, &multi_sig, session.metadata.as_ref())?;

        info!(sig_id = session.id, signers = multi_sig.sigs.len(), "signing session completed");
        ctx.emit(Event::SigningCompleted { sig_id: session.id });

        for participant in multi_sig.participants() {
            self.rewarder.release_rewards(ctx, &participant);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use quorum_core::{KeyId, KeyState};

    use crate::keeper::testutil::*;
    use crate::params::Params;

    #[test]
    fn test_expired_keygen_clears_missing() {
        let rewarder = Arc::new(RecordingRewarder::default());
        let mut keeper = keeper_with(
            Params::default(),
            Arc::new(RecordingHandler::default()),
            rewarder.clone(),
        );
        let key_id = KeyId::new("key-1");
        keeper.start_keygen(&mut ctx(1), &key_id).unwrap();
        keeper.add_pub_key(&mut ctx(2), &key_id, &operator(3), pub_key(3)).unwrap();

        // expires at 11, collected at the end of block 10
        let mut ctx9 = ctx(9);
        keeper.end_block(&mut ctx9);
        assert!(keeper.keygen_session(&key_id).is_some());

        let mut ctx10 = ctx(10);
        keeper.end_block(&mut ctx10);
        assert!(keeper.keygen_session(&key_id).is_none());
        assert!(keeper.key(&key_id).is_none());
        assert_eq!(ctx10.events().len(), 1);
        assert_eq!(
            *rewarder.cleared.lock().unwrap(),
            vec![operator(1), operator(2)]
        );
    }

    #[test]
    fn test_completed_keygen_sets_inactive_key() {
        let rewarder = Arc::new(RecordingRewarder::default());
        let mut keeper = keeper_with(
            Params::default(),
            Arc::new(RecordingHandler::default()),
            rewarder.clone(),
        );
        let key_id = KeyId::new("key-1");
        keeper.start_keygen(&mut ctx(1), &key_id).unwrap();
        keeper.add_pub_key(&mut ctx(2), &key_id, &operator(3), pub_key(3)).unwrap();
        keeper.add_pub_key(&mut ctx(2), &key_id, &operator(2), pub_key(2)).unwrap();

        // completed at 2 with grace 10: collected at the end of block 10
        // since expires_at 11 comes first
        keeper.end_block(&mut ctx(10));

        let key = keeper.key(&key_id).unwrap();
        assert_eq!(key.state, KeyState::Inactive);
        assert_eq!(key.pub_keys.len(), 2);
        assert_eq!(rewarder.released.lock().unwrap().len(), 2);
    }
}
