//! Optional TOML configuration file.
//!
//! Every field is optional; whatever the file leaves out keeps its built-in
//! default (or the value from a lower-precedence source).  Example:
//!
//! ```toml
//! bind_addr = "0.0.0.0:9000"
//! sweep_interval_secs = 10
//! liveness_threshold_secs = 30
//! offline_grace_secs = 300
//! lock_timeout_ms = 2000
//! outbound_queue = 512
//! fanout = "all-observers"
//! log_level = "debug"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::{FanoutPolicy, HubConfig};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// A file system I/O error occurred.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// On-disk schema.  Unknown keys are rejected so typos do not go unnoticed.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub bind_addr: Option<SocketAddr>,
    pub sweep_interval_secs: Option<u64>,
    pub liveness_threshold_secs: Option<u64>,
    pub offline_grace_secs: Option<u64>,
    pub lock_timeout_ms: Option<u64>,
    pub outbound_queue: Option<usize>,
    pub fanout: Option<FanoutPolicy>,
    pub log_level: Option<String>,
}

impl ConfigFile {
    /// Reads and parses `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigFileError> {
        Ok(toml::from_str(text)?)
    }

    /// Overlays the values present in the file onto `base`.
    pub fn apply(&self, base: HubConfig) -> HubConfig {
        HubConfig {
            bind_addr: self.bind_addr.unwrap_or(base.bind_addr),
            sweep_interval: self
                .sweep_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(base.sweep_interval),
            liveness_threshold: self
                .liveness_threshold_secs
                .map(Duration::from_secs)
                .unwrap_or(base.liveness_threshold),
            offline_grace: self
                .offline_grace_secs
                .map(Duration::from_secs)
                .unwrap_or(base.offline_grace),
            lock_timeout: self
                .lock_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(base.lock_timeout),
            outbound_queue: self.outbound_queue.unwrap_or(base.outbound_queue),
            fanout: self.fanout.unwrap_or(base.fanout),
            log_level: self.log_level.clone().unwrap_or(base.log_level),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
