//! Ceremony keeper
//!
//! Owns the ceremony state and applies every mutation to it: session
//! creation, submissions, key rotation and end-of-block finalization.

mod keygen;
mod rotation;
mod signing;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use quorum_core::{Key, KeyId, KeygenSession, SigningSession};
use tracing::warn;

use crate::collaborators::{Rewarder, Snapshotter};
use crate::context::BlockContext;
use crate::error::{ChainError, Result};
use crate::params::Params;
use crate::router::SigRouter;
use crate::store::State;

pub struct Keeper {
    pub(crate) state: State,
    pub(crate) params: Params,
    pub(crate) router: SigRouter,
    pub(crate) snapshotter: Arc<dyn Snapshotter>,
    pub(crate) rewarder: Arc<dyn Rewarder>,
}

impl Keeper {
    /// Build a keeper; the router is sealed from here on
    pub fn new(
        params: Params,
        mut router: SigRouter,
        snapshotter: Arc<dyn Snapshotter>,
        rewarder: Arc<dyn Rewarder>,
    ) -> Result<Self> {
        params.validate()?;
        router.seal();

        Ok(Self {
            state: State::new(),
            params,
            router,
            snapshotter,
            rewarder,
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn keygen_session(&self, key_id: &KeyId) -> Option<&KeygenSession> {
        self.state.keygen_session(key_id)
    }

    pub fn key(&self, key_id: &KeyId) -> Option<&Key> {
        self.state.key(key_id)
    }

    pub fn signing_session(&self, sig_id: u64) -> Option<&SigningSession> {
        self.state.signing_session(sig_id)
    }

    /// Run `f` inside a savepoint
    ///
    /// State writes and events made by `f` are kept only if it returns `Ok`.
    /// A panic inside `f` is caught, rolled back and reported as
    /// [`ChainError::Panicked`]. Rolling back undoes only the writes `f`
    /// made. Calls `f` makes into the [`Rewarder`] or a
    /// [`SigHandler`](crate::router::SigHandler) are outside the savepoint
    /// and are not undone.
    pub fn run_cached<T, F>(&mut self, ctx: &mut BlockContext, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self, &mut BlockContext) -> Result<T>,
    {
        let savepoint = self.state.begin();
        let mut branch = ctx.branch();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(self, &mut branch)));

        match outcome {
            Ok(Ok(value)) => {
                self.state.commit(savepoint);
                ctx.merge(branch);
                Ok(value)
            }
            Ok(Err(err)) => {
                self.state.rollback(savepoint);
                Err(err)
            }
            Err(payload) => {
                self.state.rollback(savepoint);
                let message = panic_message(payload.as_ref());
                warn!(height = ctx.height, panic = %message, "rolled back panicking work");
                Err(ChainError::Panicked(message))
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
