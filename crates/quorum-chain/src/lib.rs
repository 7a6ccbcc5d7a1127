//! # Quorum Chain
//!
//! Deterministic ceremony store for threshold keys.
//!
//! The [`Keeper`] owns keygen sessions, signing sessions, generated keys and
//! per-chain key rotation. It is driven by submitted [`quorum_core::Msg`]s
//! through [`Keeper::handle_msg`] and by [`Keeper::end_block`], which
//! finalizes sessions as they expire.
//!
//! Participant selection and reward accounting are provided by the caller
//! through the [`Snapshotter`] and [`Rewarder`] traits. Requesting modules
//! learn about finished signatures through a [`SigHandler`] registered on the
//! [`SigRouter`].

pub mod collaborators;
pub mod context;
mod end_block;
pub mod error;
pub mod keeper;
mod msg_server;
pub mod params;
pub mod router;
pub mod store;

pub use collaborators::{RegisteredValidator, Rewarder, Snapshotter, StaticSnapshotter};
pub use context::BlockContext;
pub use error::{ChainError, Result};
pub use keeper::Keeper;
pub use params::Params;
pub use router::{SigHandler, SigRouter};
pub use store::State;
