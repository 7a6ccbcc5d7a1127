use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::{HealthRequest, HealthResponse};
use crate::error::{DaemonError, Result};

/// Health socket client, used by the `health-check` command
pub struct HealthClient {
    socket_path: PathBuf,
}

impl HealthClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Send a request and get a response
    pub async fn request(&self, request: &HealthRequest) -> Result<HealthResponse> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound
                || e.kind() == std::io::ErrorKind::ConnectionRefused
            {
                DaemonError::Ipc("Daemon not running".to_string())
            } else {
                DaemonError::Ipc(format!("Failed to connect: {}", e))
            }
        })?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let json = serde_json::to_string(request)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut line = String::new();
        reader.read_line(&mut line).await?;

        let response: HealthResponse = serde_json::from_str(&line)?;
        Ok(response)
    }

    /// Check if daemon is running
    pub async fn ping(&self) -> bool {
        matches!(
            self.request(&HealthRequest::Ping).await,
            Ok(HealthResponse::Pong { .. })
        )
    }
}
