//! JSON-lines ledger client over a Unix domain socket

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use quorum_core::AccAddress;

use super::{BlockEvents, Ledger, Tx, TxResult};
use crate::error::{BroadcastError, DaemonError, Result};

/// Ledger request types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LedgerRequest {
    /// Stream committed blocks on this connection
    Subscribe,

    AccountSequence { account: AccAddress },

    Submit { tx: Tx },

    TxResult { hash: String },
}

/// Why the ledger refused to queue a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    WrongSequence,
    OutOfGas,
}

/// Ledger response types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LedgerResponse {
    Block(BlockEvents),

    Sequence { sequence: u64 },

    Submitted { hash: String },

    Rejected { reason: Rejection },

    TxResult { result: Option<TxResult> },

    Error { message: String },
}

/// Ledger client
pub struct UnixLedgerClient {
    socket_path: PathBuf,
}

impl UnixLedgerClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Send a request and get a response
    pub async fn request(&self, request: &LedgerRequest) -> Result<LedgerResponse> {
        let stream = connect(&self.socket_path).await?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        write_line(&mut writer, request).await?;

        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(DaemonError::Ipc("ledger closed the connection".to_string()));
        }

        let response: LedgerResponse = serde_json::from_str(&line)?;
        Ok(response)
    }

    async fn request_for_broadcast(
        &self,
        request: &LedgerRequest,
    ) -> std::result::Result<LedgerResponse, BroadcastError> {
        match self.request(request).await {
            Ok(LedgerResponse::Rejected { reason }) => Err(match reason {
                Rejection::WrongSequence => BroadcastError::WrongSequence,
                Rejection::OutOfGas => BroadcastError::OutOfGas,
            }),
            Ok(LedgerResponse::Error { message }) => Err(BroadcastError::Transport(message)),
            Ok(response) => Ok(response),
            Err(e) => Err(BroadcastError::Transport(e.to_string())),
        }
    }
}

#[async_trait]
impl Ledger for UnixLedgerClient {
    async fn subscribe(&self) -> Result<mpsc::Receiver<BlockEvents>> {
        let stream = connect(&self.socket_path).await?;
        let (reader, mut writer) = stream.into_split();
        write_line(&mut writer, &LedgerRequest::Subscribe).await?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            // keep the write half open for the lifetime of the subscription
            let _writer = writer;
            let mut reader = BufReader::new(reader);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => match serde_json::from_str::<LedgerResponse>(&line) {
                        Ok(LedgerResponse::Block(block)) => {
                            if tx.send(block).await.is_err() {
                                break;
                            }
                        }
                        Ok(other) => warn!(response = ?other, "unexpected response on subscription"),
                        Err(e) => warn!(error = %e, "invalid block on subscription"),
                    },
                    Err(e) => {
                        warn!(error = %e, "ledger subscription failed");
                        break;
                    }
                }
            }
            debug!("ledger subscription closed");
        });

        Ok(rx)
    }

    async fn account_sequence(
        &self,
        account: &AccAddress,
    ) -> std::result::Result<u64, BroadcastError> {
        let request = LedgerRequest::AccountSequence {
            account: account.clone(),
        };
        match self.request_for_broadcast(&request).await? {
            LedgerResponse::Sequence { sequence } => Ok(sequence),
            other => Err(unexpected(other)),
        }
    }

    async fn submit(&self, tx: &Tx) -> std::result::Result<String, BroadcastError> {
        let request = LedgerRequest::Submit { tx: tx.clone() };
        match self.request_for_broadcast(&request).await? {
            LedgerResponse::Submitted { hash } => Ok(hash),
            other => Err(unexpected(other)),
        }
    }

    async fn tx_result(&self, hash: &str) -> std::result::Result<Option<TxResult>, BroadcastError> {
        let request = LedgerRequest::TxResult {
            hash: hash.to_string(),
        };
        match self.request_for_broadcast(&request).await? {
            LedgerResponse::TxResult { result } => Ok(result),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: LedgerResponse) -> BroadcastError {
    BroadcastError::Transport(format!("unexpected ledger response: {:?}", response))
}

async fn connect(path: &Path) -> Result<UnixStream> {
    UnixStream::connect(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound
            || e.kind() == std::io::ErrorKind::ConnectionRefused
        {
            DaemonError::Ipc("Ledger not reachable".to_string())
        } else {
            DaemonError::Ipc(format!("Failed to connect: {}", e))
        }
    })
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
    T: Serialize,
{
    let json = serde_json::to_string(value)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
