//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use quorum_core::{AccAddress, ValAddress};

use crate::error::{DaemonError, Result};

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Signature backend connection
    pub backend: BackendConfig,

    /// Submission pipeline tuning
    pub broadcast: BroadcastConfig,

    /// Exit when no block arrives for this long (seconds)
    pub no_new_block_panic_timeout_secs: u64,

    /// Hex-encoded operator address of the validator this daemon serves
    pub validator_address: String,

    /// Hex-encoded proxy account the daemon submits from
    pub sender_address: String,

    /// Unix socket of the ledger node
    pub ledger_socket_path: PathBuf,

    /// Unix socket for health queries
    pub health_socket_path: PathBuf,
}

/// How ceremonies are driven on the signature backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// One call per key share or signature
    Unary,
    /// One bidirectional stream per ceremony
    Streaming,
}

/// Signature backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub mode: BackendMode,
    pub host: String,
    pub port: u16,
    pub dial_timeout_secs: u64,
    /// Bound on every backend call
    pub rpc_timeout_secs: u64,
}

/// Broadcast pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    pub max_retries: u32,
    /// Backoff base; attempt `n` sleeps `n` times this long
    pub min_sleep_before_retry_ms: u64,
    /// How long to wait for a submitted transaction to be included (seconds)
    pub max_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Pending submissions at which merging into one batch starts
    pub batch_threshold: usize,
    /// Maximum number of messages per merged batch
    pub batch_size_limit: usize,
    /// Log execution errors instead of returning them
    pub suppress_execution_errors: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            broadcast: BroadcastConfig::default(),
            no_new_block_panic_timeout_secs: 120,
            validator_address: String::new(),
            sender_address: String::new(),
            ledger_socket_path: Self::runtime_path("quorum-ledger.sock"),
            health_socket_path: Self::runtime_path("quorum-daemon.sock"),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            mode: BackendMode::Unary,
            host: "127.0.0.1".to_string(),
            port: 50051,
            dial_timeout_secs: 15,
            rpc_timeout_secs: 10,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_sleep_before_retry_ms: 5000,
            max_timeout_secs: 15,
            poll_interval_ms: 2000,
            batch_threshold: 3,
            batch_size_limit: 250,
            suppress_execution_errors: true,
        }
    }
}

impl BackendConfig {
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

impl BroadcastConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.min_sleep_before_retry_ms)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_secs(self.max_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl DaemonConfig {
    fn runtime_path(name: &str) -> PathBuf {
        // Use XDG_RUNTIME_DIR if available, fallback to /tmp
        std::env::var_os("XDG_RUNTIME_DIR")
            .map(|dir| PathBuf::from(dir).join(name))
            .unwrap_or_else(|| PathBuf::from("/tmp").join(name))
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("quorum")
            .join("daemon.json")
    }

    pub fn validator(&self) -> Result<ValAddress> {
        ValAddress::from_hex(&self.validator_address)
            .map_err(|e| DaemonError::Config(format!("validator_address: {}", e)))
    }

    pub fn sender(&self) -> Result<AccAddress> {
        AccAddress::from_hex(&self.sender_address)
            .map_err(|e| DaemonError::Config(format!("sender_address: {}", e)))
    }

    pub fn no_new_block_timeout(&self) -> Duration {
        Duration::from_secs(self.no_new_block_panic_timeout_secs)
    }

    /// Check settings that have no sensible fallback
    pub fn validate(&self) -> Result<()> {
        self.validator()?;
        self.sender()?;

        if self.broadcast.batch_threshold == 0 || self.broadcast.batch_size_limit == 0 {
            return Err(DaemonError::Config(
                "batch threshold and size limit must be >0".to_string(),
            ));
        }
        if self.broadcast.batch_size_limit > quorum_core::msg::MAX_BATCH_SIZE {
            return Err(DaemonError::Config(format!(
                "batch size limit must be <={}",
                quorum_core::msg::MAX_BATCH_SIZE
            )));
        }
        if self.no_new_block_panic_timeout_secs == 0 {
            return Err(DaemonError::Config(
                "no new block timeout must be >0".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create socket directories if they don't exist
    pub fn ensure_directories(&self) -> Result<()> {
        if let Some(parent) = self.health_socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

/// Helper module for dirs crate functionality
mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
    }
}
