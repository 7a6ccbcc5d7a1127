//! Message handling
//!
//! Entry point for submitted messages: stateless validation first, then
//! dispatch to the keeper.

use quorum_core::{ownership_digest, Event, Msg};
use tracing::debug;

use crate::context::BlockContext;
use crate::error::{ChainError, Result};
use crate::keeper::Keeper;

impl Keeper {
    /// Validate and execute one submitted message
    ///
    /// A failed message leaves no trace in the store. For a batch, the
    /// returned [`ChainError::BatchMember`] names the failing member.
    pub fn handle_msg(&mut self, ctx: &mut BlockContext, msg: &Msg) -> Result<()> {
        msg.validate_basic()?;
        debug!(sender = %msg.sender(), operations = msg.len(), "handling message");

        self.run_cached(ctx, |k, ctx| k.dispatch(ctx, msg))
    }

    fn dispatch(&mut self, ctx: &mut BlockContext, msg: &Msg) -> Result<()> {
        match msg {
            Msg::StartKeygen { key_id, .. } => self.start_keygen(ctx, key_id),

            Msg::SubmitPubKey {
                sender,
                key_id,
                pub_key,
                signature,
            } => {
                let validator = self.ensure_registered_proxy(sender)?;
                pub_key
                    .verify(&ownership_digest(&validator), signature)
                    .map_err(|_| {
                        ChainError::Unauthorized(format!(
                            "signature does not prove ownership of public key for {}",
                            validator
                        ))
                    })?;
                self.add_pub_key(ctx, key_id, &validator, *pub_key)
            }

            Msg::SubmitSignature {
                sender,
                sig_id,
                signature,
            } => {
                let validator = self.ensure_registered_proxy(sender)?;
                self.add_sig(ctx, *sig_id, &validator, *signature)
            }

            Msg::RotateKey { chain, key_id, .. } => {
                if let Some(current) = self.current_key_id(chain) {
                    return Err(ChainError::Precondition(format!(
                        "chain {} already has current key {}",
                        chain, current
                    )));
                }
                self.assign_key(ctx, chain, key_id)?;
                self.rotate_key(ctx, chain)
            }

            Msg::KeygenOptOut { sender } => self.opt_out_of_keygen(ctx, sender),
            Msg::KeygenOptIn { sender } => self.opt_in_to_keygen(ctx, sender),

            Msg::ProcessKeygenTraffic {
                sender,
                session_id,
                payload,
            } => {
                let from = self.ensure_registered_proxy(sender)?;
                ctx.emit(Event::KeygenTraffic {
                    session_id: session_id.clone(),
                    from,
                    payload: payload.clone(),
                });
                Ok(())
            }

            Msg::ProcessSignTraffic {
                sender,
                session_id,
                payload,
            } => {
                let from = self.ensure_registered_proxy(sender)?;
                ctx.emit(Event::SignTraffic {
                    session_id: session_id.clone(),
                    from,
                    payload: payload.clone(),
                });
                Ok(())
            }

            Msg::SubmitStreamResult {
                sender,
                session_id,
                result,
            } => {
                let voter = self.ensure_registered_proxy(sender)?;
                ctx.emit(Event::StreamResultSubmitted {
                    session_id: session_id.clone(),
                    voter,
                    result: result.clone(),
                });
                Ok(())
            }

            Msg::Batch { messages, .. } => {
                for (index, member) in messages.iter().enumerate() {
                    self.dispatch(ctx, member)
                        .map_err(|source| ChainError::BatchMember {
                            index,
                            source: Box::new(source),
                        })?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use k256::ecdsa::{signature::hazmat::PrehashSigner, Signature as K256Signature};
    use quorum_core::{AccAddress, ChainName, KeyId, KeyState, Signature, TrafficOut};

    use super::*;
    use crate::keeper::testutil::*;

    fn ownership_proof(i: u8) -> Signature {
        let sig: K256Signature = signing_key(i)
            .sign_prehash(&ownership_digest(&operator(i)))
            .unwrap();
        Signature::from(sig)
    }

    fn submit_pub_key(i: u8, key_id: &KeyId) -> Msg {
        Msg::SubmitPubKey {
            sender: proxy(i),
            key_id: key_id.clone(),
            pub_key: pub_key(i),
            signature: ownership_proof(i),
        }
    }

    #[test]
    fn test_submit_pub_key_resolves_proxy() {
        let mut keeper = keeper();
        let mut ctx = ctx(1);
        let key_id = KeyId::new("key-1");

        keeper
            .handle_msg(&mut ctx, &Msg::StartKeygen { sender: proxy(1), key_id: key_id.clone() })
            .unwrap();
        keeper.handle_msg(&mut ctx, &submit_pub_key(2, &key_id)).unwrap();

        let session = keeper.keygen_session(&key_id).unwrap();
        assert_eq!(session.key.pub_key(&operator(2)), Some(&pub_key(2)));
    }

    #[test]
    fn test_submit_pub_key_rejects_bad_ownership_proof() {
        let mut keeper = keeper();
        let mut ctx = ctx(1);
        let key_id = KeyId::new("key-1");
        keeper
            .handle_msg(&mut ctx, &Msg::StartKeygen { sender: proxy(1), key_id: key_id.clone() })
            .unwrap();

        let msg = Msg::SubmitPubKey {
            sender: proxy(2),
            key_id: key_id.clone(),
            pub_key: pub_key(2),
            signature: ownership_proof(3),
        };
        assert!(matches!(
            keeper.handle_msg(&mut ctx, &msg),
            Err(ChainError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_unknown_proxy_rejected() {
        let mut keeper = keeper();
        let msg = Msg::SubmitSignature {
            sender: AccAddress::new(vec![0xee]),
            sig_id: 0,
            signature: ownership_proof(1),
        };
        let err = keeper.handle_msg(&mut ctx(1), &msg).unwrap_err();
        assert!(err.to_string().contains("not a registered proxy"));
    }

    #[test]
    fn test_rotate_key_msg_only_for_first_key() {
        let mut keeper = keeper();
        let mut ctx = ctx(1);
        let chain = ChainName::new("ethereum");

        for id in ["key-1", "key-2"] {
            let key_id = KeyId::new(id);
            keeper
                .handle_msg(&mut ctx, &Msg::StartKeygen { sender: proxy(1), key_id: key_id.clone() })
                .unwrap();
            for i in 1..=3 {
                keeper.handle_msg(&mut ctx, &submit_pub_key(i, &key_id)).unwrap();
            }
            let key = keeper.keygen_session(&key_id).unwrap().result().unwrap();
            keeper.set_key(&mut ctx, key);
        }

        let rotate = |id: &str| Msg::RotateKey {
            sender: proxy(1),
            chain: chain.clone(),
            key_id: KeyId::new(id),
        };
        keeper.handle_msg(&mut ctx, &rotate("key-1")).unwrap();
        assert_eq!(keeper.key(&KeyId::new("key-1")).unwrap().state, KeyState::Active);

        assert!(keeper.handle_msg(&mut ctx, &rotate("key-2")).is_err());
        assert_eq!(keeper.key(&KeyId::new("key-2")).unwrap().state, KeyState::Inactive);
    }

    #[test]
    fn test_traffic_is_relayed_with_validator() {
        let mut keeper = keeper();
        let mut ctx = ctx(1);
        let payload = TrafficOut {
            to_party_uid: String::new(),
            payload: vec![1, 2, 3],
            is_broadcast: true,
        };

        keeper
            .handle_msg(
                &mut ctx,
                &Msg::ProcessKeygenTraffic {
                    sender: proxy(2),
                    session_id: "key-1".to_string(),
                    payload: payload.clone(),
                },
            )
            .unwrap();

        assert_eq!(
            ctx.events(),
            &[Event::KeygenTraffic {
                session_id: "key-1".to_string(),
                from: operator(2),
                payload,
            }]
        );
    }

    #[test]
    fn test_batch_is_atomic() {
        let mut keeper = keeper();
        let mut ctx = ctx(1);
        let key_id = KeyId::new("key-1");
        keeper
            .handle_msg(&mut ctx, &Msg::StartKeygen { sender: proxy(1), key_id: key_id.clone() })
            .unwrap();
        let events_before = ctx.events().len();

        let batch = Msg::Batch {
            sender: proxy(2),
            messages: vec![
                submit_pub_key(2, &key_id),
                Msg::SubmitSignature {
                    sender: proxy(2),
                    sig_id: 42,
                    signature: ownership_proof(2),
                },
            ],
        };

        match keeper.handle_msg(&mut ctx, &batch) {
            Err(ChainError::BatchMember { index, source }) => {
                assert_eq!(index, 1);
                assert!(matches!(*source, ChainError::NotFound(_)));
            }
            other => panic!("unexpected result {:?}", other),
        }

        assert!(keeper.keygen_session(&key_id).unwrap().key.pub_keys.is_empty());
        assert_eq!(ctx.events().len(), events_before);
    }
}
