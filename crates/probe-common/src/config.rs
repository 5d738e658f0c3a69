//! Configuration structures for the probe.
//!
//! Supports TOML deserialization with defaults matching the well-known
//! channel location, so the probe runs without any config file.

use crate::error::{ProbeError, ProbeResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default location of the publish FIFO.
pub const DEFAULT_PIPE_PATH: &str = "/tmp/shinobi.pipe";

/// Default permission bits for the FIFO entry (any local reader may attach).
pub const DEFAULT_PIPE_MODE: u32 = 0o666;

/// Top-level probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Filesystem path of the publish FIFO.
    pub pipe_path: PathBuf,

    /// Permission bits applied to the FIFO after creation.
    pub pipe_mode: u32,

    /// Fixed interval between sampling cycles.
    #[serde(with = "humantime_serde")]
    pub sample_interval: Duration,

    /// Tear down and reopen the channel (waiting for a new reader) after a
    /// failed publish instead of continuing on the failed handle.
    pub reconnect_on_failure: bool,

    /// Stop after this many cycles (0 = run until a stop is requested).
    pub max_cycles: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            pipe_path: PathBuf::from(DEFAULT_PIPE_PATH),
            pipe_mode: DEFAULT_PIPE_MODE,
            sample_interval: Duration::from_secs(1),
            reconnect_on_failure: false,
            max_cycles: 0,
        }
    }
}

impl ProbeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Config`] for an empty pipe path or a mode with
    /// bits outside `0o777`.
    pub fn validate(&self) -> ProbeResult<()> {
        if self.pipe_path.as_os_str().is_empty() {
            return Err(ProbeError::Config("pipe_path must not be empty".into()));
        }
        if self.pipe_mode & !0o777 != 0 {
            return Err(ProbeError::Config(format!(
                "pipe_mode {:#o} has bits outside 0o777",
                self.pipe_mode
            )));
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
