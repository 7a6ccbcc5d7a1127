use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use quorum_core::{AccAddress, Msg};

use super::Broadcaster;
use crate::error::BroadcastError;
use crate::ledger::{Ledger, Tx, TxResult};

/// Innermost layer: signs for one account and waits for inclusion
///
/// The sequence lock is held from submission until the transaction was
/// included, so two submissions never share an account sequence.
pub struct StatefulBroadcaster {
    ledger: Arc<dyn Ledger>,
    sender: AccAddress,
    /// Next sequence to use, `None` when it has to be fetched from the ledger
    sequence: Mutex<Option<u64>>,
    poll_interval: Duration,
    max_timeout: Duration,
}

impl StatefulBroadcaster {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        sender: AccAddress,
        poll_interval: Duration,
        max_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            sender,
            sequence: Mutex::new(None),
            poll_interval,
            max_timeout,
        }
    }

    fn envelope(&self, mut msgs: Vec<Msg>) -> Msg {
        if msgs.len() == 1 {
            if let Some(msg) = msgs.pop() {
                return msg.with_sender(&self.sender);
            }
        }
        Msg::Batch {
            sender: self.sender.clone(),
            messages: msgs,
        }
        .with_sender(&self.sender)
    }

    async fn wait_for_inclusion(&self, hash: &str) -> std::result::Result<TxResult, BroadcastError> {
        let poll = async {
            loop {
                if let Some(result) = self.ledger.tx_result(hash).await? {
                    return Ok(result);
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        tokio::time::timeout(self.max_timeout, poll)
            .await
            .map_err(|_| BroadcastError::Timeout)?
    }
}

#[async_trait]
impl Broadcaster for StatefulBroadcaster {
    async fn broadcast(&self, msgs: Vec<Msg>) -> std::result::Result<(), BroadcastError> {
        if msgs.is_empty() {
            return Ok(());
        }
        let msg = self.envelope(msgs);

        let mut cached = self.sequence.lock().await;
        let sequence = match *cached {
            Some(sequence) => sequence,
            None => self.ledger.account_sequence(&self.sender).await?,
        };

        let tx = Tx {
            sender: self.sender.clone(),
            sequence,
            msg,
        };
        let hash = match self.ledger.submit(&tx).await {
            Ok(hash) => hash,
            Err(BroadcastError::WrongSequence) => {
                warn!(sequence, "stale account sequence, refetching on next submission");
                *cached = None;
                return Err(BroadcastError::WrongSequence);
            }
            Err(e) => {
                *cached = Some(sequence);
                return Err(e);
            }
        };
        *cached = Some(sequence + 1);

        let result = self.wait_for_inclusion(&hash).await?;
        debug!(hash = %result.hash, height = result.height, code = result.code, "transaction included");

        if result.is_ok() {
            Ok(())
        } else {
            Err(BroadcastError::Execution {
                code: result.code,
                log: result.log,
                message_index: result.message_index,
            })
        }
    }
}
