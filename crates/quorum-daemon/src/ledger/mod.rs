//! Ledger access: block event subscription and transaction submission

pub mod unix;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use quorum_core::{AccAddress, Event, Msg};

use crate::error::{BroadcastError, Result};

pub use unix::UnixLedgerClient;

/// A committed block and the ceremony events it emitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEvents {
    pub height: u64,
    pub events: Vec<Event>,
}

/// Signed-over envelope for one submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub sender: AccAddress,
    pub sequence: u64,
    pub msg: Msg,
}

/// Execution outcome of an included transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    pub hash: String,
    pub height: u64,
    /// Zero on success
    pub code: u32,
    pub log: String,
    /// Failing member when the transaction carried a batch
    pub message_index: Option<usize>,
}

impl TxResult {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Committed blocks in height order
    async fn subscribe(&self) -> Result<mpsc::Receiver<BlockEvents>>;

    /// Next sequence number the ledger expects from `account`
    async fn account_sequence(&self, account: &AccAddress)
        -> std::result::Result<u64, BroadcastError>;

    /// Check and queue a transaction, returning its hash
    async fn submit(&self, tx: &Tx) -> std::result::Result<String, BroadcastError>;

    /// Outcome of a transaction, once it was included in a block
    async fn tx_result(&self, hash: &str) -> std::result::Result<Option<TxResult>, BroadcastError>;
}
