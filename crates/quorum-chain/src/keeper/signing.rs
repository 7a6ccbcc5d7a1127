//! Signing session bookkeeping

use quorum_core::{
    payload_hash, Event, Hash, KeyId, KeyState, ModuleMetadata, RequesterModule, Signature,
    SigningSession, ValAddress,
};
use tracing::info;

use super::Keeper;
use crate::context::BlockContext;
use crate::error::{ChainError, Result};

impl Keeper {
    /// Open a signing session for `payload_hash` under an active key
    ///
    /// Returns the new signing session ID.
    ///
    /// # Panics
    /// When `module` has no registered handler.
    pub fn sign(
        &mut self,
        ctx: &mut BlockContext,
        key_id: &KeyId,
        payload_hash: &[u8],
        module: RequesterModule,
        metadata: Option<ModuleMetadata>,
    ) -> Result<u64> {
        if !self.router.has_handler(module) {
            panic!("no sig handler registered for module {}", module);
        }

        let key = self
            .state
            .key(key_id)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("key {}", key_id)))?;
        if key.state != KeyState::Active {
            return Err(ChainError::Precondition(format!(
                "key {} is not activated",
                key_id
            )));
        }

        let hash = Hash::from_slice(payload_hash)?;
        let expires_at = ctx.height + self.params.signing_timeout;
        let session = SigningSession::new(
            self.state.peek_sig_id(),
            key,
            hash,
            expires_at,
            self.params.signing_grace_period,
            module,
            metadata,
        );
        session.validate_basic()?;

        let sig_id = self.state.next_sig_id();
        info!(
            sig_id,
            key_id = %session.key.id,
            module = %module,
            participant_count = session.key.pub_keys.len(),
            expires_at,
            "signing session started"
        );

        ctx.emit(Event::SigningStarted {
            sig_id,
            key_id: session.key.id.clone(),
            payload_hash: hash,
            module,
            pub_keys: session.key.pub_keys.clone(),
            expires_at,
        });
        self.state.set_signing_session(session);

        Ok(sig_id)
    }

    /// Hash `payload` with SHA-256 and open a signing session for it
    pub fn sign_payload(
        &mut self,
        ctx: &mut BlockContext,
        key_id: &KeyId,
        payload: &[u8],
        module: RequesterModule,
        metadata: Option<ModuleMetadata>,
    ) -> Result<u64> {
        let hash = payload_hash(payload);
        self.sign(ctx, key_id, hash.as_bytes(), module, metadata)
    }

    /// Record a participant's signature in the running signing session
    pub fn add_sig(
        &mut self,
        ctx: &mut BlockContext,
        sig_id: u64,
        participant: &ValAddress,
        signature: Signature,
    ) -> Result<()> {
        let mut session = self
            .state
            .signing_session(sig_id)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("signing session {}", sig_id)))?;

        let was_completed = session.is_completed();
        session.add_sig(ctx.height, participant, signature)?;

        if !was_completed && session.is_completed() {
            info!(sig_id, height = ctx.height, "signing session reached quorum");
        }

        ctx.emit(Event::SignatureSubmitted {
            sig_id,
            participant: participant.clone(),
            signature,
        });
        self.state.set_signing_session(session);

        Ok(())
    }
}
