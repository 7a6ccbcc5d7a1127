//! Coordinator for backends answering one call per key share or signature

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, info_span, Instrument};

use quorum_core::{ownership_digest, Event, Hash, KeyId, Msg, PublicKey, ValAddress};

use crate::backend::SignatureBackend;
use crate::broadcast::{pending_sender, Broadcaster};
use crate::error::{DaemonError, Result};

pub struct UnaryManager {
    backend: Arc<dyn SignatureBackend>,
    broadcaster: Arc<dyn Broadcaster>,
    validator: ValAddress,
    rpc_timeout: Duration,
}

impl UnaryManager {
    pub fn new(
        backend: Arc<dyn SignatureBackend>,
        broadcaster: Arc<dyn Broadcaster>,
        validator: ValAddress,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            broadcaster,
            validator,
            rpc_timeout,
        }
    }

    /// React to one ledger event
    ///
    /// A backend failure aborts this validator's contribution to the
    /// ceremony; nothing is retried and nothing is partially submitted.
    pub async fn handle_event(&self, event: &Event) -> Result<()> {
        match event {
            Event::KeygenStarted {
                key_id,
                participants,
                share_counts,
                ..
            } => self.keygen(key_id, participants, share_counts).await,
            Event::SigningStarted {
                sig_id,
                key_id,
                payload_hash,
                pub_keys,
                ..
            } => self.sign(*sig_id, key_id, payload_hash, pub_keys).await,
            _ => Ok(()),
        }
    }

    async fn keygen(
        &self,
        key_id: &KeyId,
        participants: &[ValAddress],
        share_counts: &[u32],
    ) -> Result<()> {
        let index = match participants.iter().position(|p| p == &self.validator) {
            Some(index) => index,
            None => return Ok(()),
        };
        let share_count = share_counts.get(index).copied().unwrap_or(1);

        let party_uid = self.validator.to_hex();
        let digest = ownership_digest(&self.validator);

        let mut msgs = Vec::with_capacity(share_count as usize);
        for share in 0..share_count {
            let key_uid = key_id.share_uid(share);
            let span = info_span!("keygen", key_uid = %key_uid);

            let pub_key = self
                .call(self.backend.keygen(&key_uid, &party_uid))
                .instrument(span.clone())
                .await?;
            let signature = self
                .call(self.backend.sign(&key_uid, &digest, &party_uid, &pub_key))
                .instrument(span)
                .await?;

            msgs.push(Msg::SubmitPubKey {
                sender: pending_sender(),
                key_id: key_id.clone(),
                pub_key,
                signature,
            });
        }

        info!(key_id = %key_id, shares = share_count, "submitting key shares");
        self.broadcaster.broadcast(msgs).await?;
        Ok(())
    }

    async fn sign(
        &self,
        sig_id: u64,
        key_id: &KeyId,
        payload_hash: &Hash,
        pub_keys: &BTreeMap<ValAddress, PublicKey>,
    ) -> Result<()> {
        let pub_key = match pub_keys.get(&self.validator) {
            Some(pub_key) => *pub_key,
            None => return Ok(()),
        };

        let key_uid = key_id.share_uid(0);
        let party_uid = self.validator.to_hex();
        let signature = self
            .call(
                self.backend
                    .sign(&key_uid, payload_hash.as_bytes(), &party_uid, &pub_key),
            )
            .instrument(info_span!("sign", sig_id, key_uid = %key_uid))
            .await?;

        info!(sig_id, key_id = %key_id, "submitting signature");
        self.broadcaster
            .broadcast(vec![Msg::SubmitSignature {
                sender: pending_sender(),
                sig_id,
                signature,
            }])
            .await?;
        Ok(())
    }

    /// Bound a single backend call by the RPC timeout
    async fn call<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.rpc_timeout, call)
            .await
            .map_err(|_| DaemonError::Timeout)?
    }
}
