//! Quorum Daemon - Validator-side ceremony coordinator
//!
//! This crate provides:
//! - A ledger client that follows committed blocks and submits transactions
//! - Unary and streaming coordinators driving the signature backend
//! - A broadcast pipeline with sequencing, retries and batching
//! - Height-based timeouts for streamed ceremonies
//! - A health socket for liveness and status queries

pub mod backend;
pub mod broadcast;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod ledger;
pub mod session;
pub mod stream;
pub mod timeout;
pub mod unary;

pub use backend::{GrpcBackend, KeyPresence, SignatureBackend, StreamingBackend};
pub use broadcast::Broadcaster;
pub use config::{BackendMode, DaemonConfig};
pub use dispatch::{DaemonStatus, EventBus, StatusHandle};
pub use error::{BroadcastError, DaemonError, Result};
pub use health::{HealthClient, HealthServer};
pub use ledger::{Ledger, UnixLedgerClient};
pub use stream::StreamingManager;
pub use unary::UnaryManager;
