use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{debug, error, info};

use super::{HealthRequest, HealthResponse};
use crate::dispatch::StatusHandle;
use crate::error::{DaemonError, Result};

/// Health socket server
pub struct HealthServer {
    socket_path: PathBuf,
    status: StatusHandle,
}

impl HealthServer {
    pub fn new(socket_path: PathBuf, status: StatusHandle) -> Self {
        Self {
            socket_path,
            status,
        }
    }

    /// Serve until the task is dropped
    pub async fn run(&self) -> Result<()> {
        let listener = bind(&self.socket_path)?;

        info!("Health socket listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let status = self.status.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, status).await {
                            error!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

fn bind(path: &Path) -> Result<UnixListener> {
    // a stale socket from a previous run blocks the bind
    if path.exists() {
        std::fs::remove_file(path)?;
    }

    UnixListener::bind(path).map_err(|e| DaemonError::Ipc(format!("Failed to bind socket: {}", e)))
}

async fn handle_connection<S>(stream: S, status: StatusHandle) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<HealthRequest>(&line) {
            Ok(request) => {
                debug!("Received health request: {:?}", request);
                handle_request(request, &status).await
            }
            Err(e) => HealthResponse::Error {
                message: format!("Invalid request: {}", e),
            },
        };

        send_response(&mut writer, &response).await?;
        line.clear();
    }

    Ok(())
}

async fn handle_request(request: HealthRequest, status: &StatusHandle) -> HealthResponse {
    match request {
        HealthRequest::Ping => HealthResponse::Pong {
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        HealthRequest::Status => HealthResponse::Status(status.snapshot().await),
    }
}

async fn send_response<W>(writer: &mut W, response: &HealthResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(response)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
