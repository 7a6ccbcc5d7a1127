//! Quorum Core - Shared types and ceremony session state machines
//!
//! This crate holds the deterministic part of Quorum threshold signing:
//! weighted participant snapshots, threshold math, and the keygen and signing
//! session state machines. Nothing in here performs I/O.

pub mod crypto;
pub mod error;
pub mod events;
pub mod key;
pub mod keygen;
pub mod msg;
pub mod signing;
pub mod snapshot;
pub mod threshold;
pub mod types;

pub use crypto::{ownership_digest, payload_hash, PublicKey, Signature};
pub use error::{QuorumError, QuorumError as Error, Result, SessionKind};
pub use events::Event;
pub use key::{Key, KeyEpoch, KeyState};
pub use keygen::{KeygenSession, SessionState};
pub use msg::{Msg, StreamResult, TrafficOut};
pub use signing::{ModuleMetadata, MultiSig, RequesterModule, SigningSession};
pub use snapshot::{Participant, Snapshot};
pub use threshold::Threshold;
pub use types::{AccAddress, ChainName, Hash, KeyId, ValAddress, HASH_LENGTH};
