//! Per-chain key rotation and epoch aging
//!
//! Each chain has a rotation count `n`. Epoch `n` holds the current key and
//! epoch `n + 1`, when present, the key assigned to take over next. Rotating
//! activates the next key; keys more than `active_epoch_count` epochs old
//! drop back to inactive.

use quorum_core::{ChainName, Event, Key, KeyEpoch, KeyId, KeyState};
use tracing::info;

use super::Keeper;
use crate::context::BlockContext;
use crate::error::{ChainError, Result};

impl Keeper {
    /// Schedule `key_id` as the next key of `chain`
    pub fn assign_key(
        &mut self,
        ctx: &mut BlockContext,
        chain: &ChainName,
        key_id: &KeyId,
    ) -> Result<()> {
        let mut key = self
            .state
            .key(key_id)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("key {}", key_id)))?;

        if key.state != KeyState::Inactive {
            return Err(ChainError::Precondition(format!(
                "key {} is {}, only inactive keys can be assigned",
                key_id, key.state
            )));
        }

        let next_epoch = self.state.rotation_count(chain) + 1;
        if self.state.key_epoch(chain, next_epoch).is_some() {
            return Err(ChainError::Precondition(format!(
                "next key already assigned for chain {}",
                chain
            )));
        }

        key.state = KeyState::Assigned;
        self.state
            .set_key_epoch(KeyEpoch::new(next_epoch, chain.clone(), key.id.clone()));
        self.state.set_key(key);

        info!(chain = %chain, key_id = %key_id, epoch = next_epoch, "key assigned");
        ctx.emit(Event::KeyAssigned {
            chain: chain.clone(),
            key_id: key_id.clone(),
        });

        Ok(())
    }

    /// Promote the assigned key of `chain` to current
    pub fn rotate_key(&mut self, ctx: &mut BlockContext, chain: &ChainName) -> Result<()> {
        let next_epoch = self.state.rotation_count(chain) + 1;
        let key_epoch = self
            .state
            .key_epoch(chain, next_epoch)
            .cloned()
            .ok_or_else(|| {
                ChainError::Precondition(format!("next key for chain {} not assigned", chain))
            })?;

        self.set_key_state(&key_epoch.key_id, KeyState::Active)?;
        self.state.set_rotation_count(chain, next_epoch);

        let active_epoch_count = self.params.active_epoch_count;
        if next_epoch > active_epoch_count {
            let retired_epoch = next_epoch - active_epoch_count;
            if let Some(retired) = self.state.key_epoch(chain, retired_epoch).cloned() {
                self.set_key_state(&retired.key_id, KeyState::Inactive)?;
                info!(chain = %chain, key_id = %retired.key_id, epoch = retired_epoch, "key deactivated");
            }
        }

        info!(chain = %chain, key_id = %key_epoch.key_id, epoch = next_epoch, "key rotated");
        ctx.emit(Event::KeyRotated {
            chain: chain.clone(),
            key_id: key_epoch.key_id,
        });

        Ok(())
    }

    pub fn current_key_id(&self, chain: &ChainName) -> Option<KeyId> {
        let count = self.state.rotation_count(chain);
        if count == 0 {
            return None;
        }
        self.state
            .key_epoch(chain, count)
            .map(|epoch| epoch.key_id.clone())
    }

    pub fn current_key(&self, chain: &ChainName) -> Option<&Key> {
        self.current_key_id(chain)
            .and_then(|key_id| self.state.key(&key_id))
    }

    pub fn next_key_id(&self, chain: &ChainName) -> Option<KeyId> {
        let next_epoch = self.state.rotation_count(chain) + 1;
        self.state
            .key_epoch(chain, next_epoch)
            .map(|epoch| epoch.key_id.clone())
    }

    /// Keys of `chain` usable for signing, newest first
    pub fn active_key_ids(&self, chain: &ChainName) -> Vec<KeyId> {
        let mut active = Vec::new();
        let next_epoch = self.state.rotation_count(chain) + 1;

        for epoch in (1..=next_epoch).rev() {
            let Some(key_epoch) = self.state.key_epoch(chain, epoch) else {
                continue;
            };
            let Some(key) = self.state.key(&key_epoch.key_id) else {
                continue;
            };

            match key.state {
                KeyState::Assigned => continue,
                KeyState::Active => active.push(key.id.clone()),
                KeyState::Inactive | KeyState::Pending => break,
            }
        }

        active
    }

    fn set_key_state(&mut self, key_id: &KeyId, state: KeyState) -> Result<()> {
        let mut key = self
            .state
            .key(key_id)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("key {}", key_id)))?;
        key.state = state;
        self.state.set_key(key);
        Ok(())
    }
}
