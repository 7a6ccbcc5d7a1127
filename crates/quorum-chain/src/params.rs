//! Ceremony parameters

use serde::{Deserialize, Serialize};

use quorum_core::Threshold;

use crate::error::{ChainError, Result};

/// Ceremony parameters, fixed for the lifetime of a keeper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// Weight fraction that must submit public keys for a keygen to complete
    pub keygen_threshold: Threshold,

    /// Weight fraction that must sign for a signature to complete
    pub signing_threshold: Threshold,

    /// Blocks a keygen session stays open
    pub keygen_timeout: u64,

    /// Blocks late public keys are still accepted after keygen completion
    pub keygen_grace_period: u64,

    /// Blocks a signing session stays open
    pub signing_timeout: u64,

    /// Blocks late signatures are still accepted after signing completion
    pub signing_grace_period: u64,

    /// Number of most recent epochs whose keys stay active per chain
    pub active_epoch_count: u64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            keygen_threshold: Threshold::new(80, 100),
            signing_threshold: Threshold::new(60, 100),
            keygen_timeout: 10,
            keygen_grace_period: 10,
            signing_timeout: 10,
            signing_grace_period: 1,
            active_epoch_count: 5,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<()> {
        self.keygen_threshold
            .validate()
            .map_err(|e| ChainError::Config(format!("keygen threshold: {}", e)))?;
        self.signing_threshold
            .validate()
            .map_err(|e| ChainError::Config(format!("signing threshold: {}", e)))?;

        if self.keygen_threshold.less_than(&self.signing_threshold) {
            return Err(ChainError::Config(
                "keygen threshold must be >=signing threshold".to_string(),
            ));
        }

        if self.keygen_timeout == 0 || self.signing_timeout == 0 {
            return Err(ChainError::Config("timeouts must be >0".to_string()));
        }

        if self.active_epoch_count == 0 {
            return Err(ChainError::Config(
                "active epoch count must be >0".to_string(),
            ));
        }

        Ok(())
    }

    /// Load parameters from a JSON file
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let params: Self = serde_json::from_str(&content)?;
        params.validate()?;
        Ok(params)
    }

    /// Save parameters to a JSON file
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
