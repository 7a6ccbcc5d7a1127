//! Broadcast pipeline: reliable submission of messages to the ledger
//!
//! Callers hand over messages with a placeholder sender. The pipeline is a
//! stack of layers, outermost first:
//!
//! - [`SuppressBroadcaster`] hides execution failures from callers
//! - [`BatchedBroadcaster`] merges pending submissions under load
//! - [`RetryBroadcaster`] resubmits with linear backoff
//! - [`StatefulBroadcaster`] owns the account sequence and waits for inclusion

mod batched;
mod retry;
mod stateful;
mod suppress;

use std::sync::Arc;

use async_trait::async_trait;

use quorum_core::{AccAddress, Msg};

use crate::config::BroadcastConfig;
use crate::error::BroadcastError;
use crate::ledger::Ledger;

pub use batched::BatchedBroadcaster;
pub use retry::RetryBroadcaster;
pub use stateful::StatefulBroadcaster;
pub use suppress::SuppressBroadcaster;

/// Members of a broadcast that were dropped, by position in the submitted list
pub type Excluded = Vec<(usize, BroadcastError)>;

#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Submit `msgs` and wait until they were included in a block
    async fn broadcast(&self, msgs: Vec<Msg>) -> std::result::Result<(), BroadcastError>;

    /// Submit `msgs`, allowing failed members to be dropped from the batch
    ///
    /// On success the rest of the batch was included and the dropped
    /// members are returned with the error each one failed with.
    async fn broadcast_partial(
        &self,
        msgs: Vec<Msg>,
    ) -> std::result::Result<Excluded, BroadcastError> {
        self.broadcast(msgs).await.map(|()| Vec::new())
    }
}

/// Sender for messages built before they enter the pipeline
///
/// [`StatefulBroadcaster`] replaces it with the configured account.
pub fn pending_sender() -> AccAddress {
    AccAddress::new(Vec::new())
}

/// Assemble the full layer stack on top of `ledger`
pub fn pipeline(
    ledger: Arc<dyn Ledger>,
    sender: AccAddress,
    config: &BroadcastConfig,
) -> Arc<dyn Broadcaster> {
    let stateful = StatefulBroadcaster::new(
        ledger,
        sender,
        config.poll_interval(),
        config.max_timeout(),
    );
    let retry = RetryBroadcaster::new(Arc::new(stateful), config.max_retries, config.retry_backoff());
    let batched = BatchedBroadcaster::spawn(
        Arc::new(retry),
        config.batch_threshold,
        config.batch_size_limit,
    );
    Arc::new(SuppressBroadcaster::new(
        Arc::new(batched),
        config.suppress_execution_errors,
    ))
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use tokio::sync::mpsc;

    use super::*;
    use crate::error::{DaemonError, Result};
    use crate::ledger::{BlockEvents, Tx, TxResult};

    #[derive(Default)]
    pub(crate) struct LedgerState {
        pub sequence: u64,
        pub sequence_queries: usize,
        pub submitted: Vec<Tx>,
        /// Execution failures handed out to the next included transactions
        pub failures: VecDeque<(u32, Option<usize>)>,
        /// Number of polls answered with "not yet included"
        pub pending_polls: u32,
        pub results: Vec<TxResult>,
    }

    /// In-memory ledger that enforces account sequences
    #[derive(Default)]
    pub(crate) struct MockLedger {
        pub state: Mutex<LedgerState>,
    }

    impl MockLedger {
        pub fn submitted(&self) -> Vec<Tx> {
            self.state.lock().unwrap().submitted.clone()
        }
    }

    #[async_trait]
    impl Ledger for MockLedger {
        async fn subscribe(&self) -> Result<mpsc::Receiver<BlockEvents>> {
            Err(DaemonError::Ipc("mock ledger has no subscription".to_string()))
        }

        async fn account_sequence(
            &self,
            _account: &AccAddress,
        ) -> std::result::Result<u64, BroadcastError> {
            let mut state = self.state.lock().unwrap();
            state.sequence_queries += 1;
            Ok(state.sequence)
        }

        async fn submit(&self, tx: &Tx) -> std::result::Result<String, BroadcastError> {
            let mut state = self.state.lock().unwrap();
            if tx.sequence != state.sequence {
                return Err(BroadcastError::WrongSequence);
            }
            state.sequence += 1;
            state.submitted.push(tx.clone());

            let hash = format!("tx-{}", state.submitted.len());
            let (code, message_index) = state.failures.pop_front().unwrap_or((0, None));
            let height = state.submitted.len() as u64;
            state.results.push(TxResult {
                hash: hash.clone(),
                height,
                code,
                log: if code == 0 { String::new() } else { "rejected".to_string() },
                message_index,
            });
            Ok(hash)
        }

        async fn tx_result(
            &self,
            hash: &str,
        ) -> std::result::Result<Option<TxResult>, BroadcastError> {
            let mut state = self.state.lock().unwrap();
            if state.pending_polls > 0 {
                state.pending_polls -= 1;
                return Ok(None);
            }
            Ok(state.results.iter().find(|r| r.hash == hash).cloned())
        }
    }

    /// Broadcaster that records every call and replays scripted outcomes
    #[derive(Default)]
    pub(crate) struct RecordingBroadcaster {
        pub calls: Mutex<Vec<Vec<Msg>>>,
        pub outcomes: Mutex<VecDeque<std::result::Result<(), BroadcastError>>>,
    }

    impl RecordingBroadcaster {
        pub fn with_outcomes(
            outcomes: impl IntoIterator<Item = std::result::Result<(), BroadcastError>>,
        ) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                outcomes: Mutex::new(outcomes.into_iter().collect()),
            }
        }

        pub fn calls(&self) -> Vec<Vec<Msg>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Broadcaster for RecordingBroadcaster {
        async fn broadcast(&self, msgs: Vec<Msg>) -> std::result::Result<(), BroadcastError> {
            self.calls.lock().unwrap().push(msgs);
            self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    pub fn opt_in(i: u8) -> Msg {
        Msg::KeygenOptIn {
            sender: AccAddress::new(vec![0x0b, i]),
        }
    }
}
