//! Health socket: liveness and status queries against a running daemon
//!
//! JSON lines over a Unix domain socket, one request and one response per
//! line.

mod client;
mod server;

use serde::{Deserialize, Serialize};

use crate::dispatch::DaemonStatus;

pub use client::HealthClient;
pub use server::HealthServer;

/// Health request types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HealthRequest {
    /// Check if daemon is running
    Ping,

    /// Block and session counters
    Status,
}

/// Health response types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HealthResponse {
    Pong { version: String },

    Status(DaemonStatus),

    Error { message: String },
}
