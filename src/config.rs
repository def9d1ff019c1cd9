//! YAML configuration for a [`ValidationContext`](crate::ValidationContext).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::digest::Algorithm;
use crate::errors::{HashguardError, Result};
use crate::file::DEFAULT_BLOCK_SIZE;
use crate::guard::MissingDigestPolicy;

/// Context-wide settings. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// JSON file holding guard digests. In-memory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_db: Option<PathBuf>,
    /// Algorithm for validators created by the context.
    pub algorithm: Algorithm,
    /// Default read size for file hashing.
    pub block_size: usize,
    /// Default command timeout in seconds.
    pub command_timeout: f64,
    pub missing_digest: MissingDigestPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hash_db: None,
            algorithm: Algorithm::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            command_timeout: 2.0,
            missing_digest: MissingDigestPolicy::default(),
        }
    }
}

impl Config {
    /// Read and check a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse and check YAML config text. Empty text yields the defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Config = if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml_ng::from_str(content)?
        };
        config.check()?;
        Ok(config)
    }

    /// Reject values no component can work with.
    pub fn check(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(HashguardError::config("block_size must be greater than zero"));
        }
        if !self.command_timeout.is_finite() || self.command_timeout <= 0.0 {
            return Err(HashguardError::config(
                "command_timeout must be a positive number of seconds",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.command_timeout)
    }
}
