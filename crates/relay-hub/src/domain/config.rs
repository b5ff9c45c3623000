//! Hub configuration types.
//!
//! [`HubConfig`] is the single source of truth for all runtime settings.
//! It is assembled once at startup from defaults, an optional TOML file, and
//! CLI flags (see `main.rs`), validated, and then shared read-only.
//!
//! # Design rationale
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! variable reads inside the domain) makes the hub easy to embed in tests:
//! an integration test simply builds a `HubConfig` with tiny intervals.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A configuration value that cannot work at runtime.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid config value for `{field}`: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

/// Which observers receive a device's frames and layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FanoutPolicy {
    /// Only observers that sent `watch`/`select-device` for the device.
    #[default]
    Watchers,
    /// Every connected observer, whatever it watches.  Legacy behaviour of
    /// panels that never send `watch`.
    AllObservers,
}

impl FromStr for FanoutPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "watchers" => Ok(FanoutPolicy::Watchers),
            "all-observers" | "all" => Ok(FanoutPolicy::AllObservers),
            other => Err(ConfigError {
                field: "fanout",
                reason: format!("expected `watchers` or `all-observers`, got `{other}`"),
            }),
        }
    }
}

impl fmt::Display for FanoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanoutPolicy::Watchers => f.write_str("watchers"),
            FanoutPolicy::AllObservers => f.write_str("all-observers"),
        }
    }
}

/// All runtime configuration for the relay hub.
///
/// # Example
///
/// ```rust
/// use relay_hub::domain::HubConfig;
///
/// let cfg = HubConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 8080);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: SocketAddr,

    /// How often the liveness monitor sweeps the registry.
    pub sweep_interval: Duration,

    /// A device with no traffic for longer than this is marked Offline.
    pub liveness_threshold: Duration,

    /// An Offline, unwatched device is forgotten after this long.
    pub offline_grace: Duration,

    /// Longest wait for a registry lock before the hub raises an alarm.
    pub lock_timeout: Duration,

    /// Capacity of each connection's outbound queue.  A full queue drops
    /// messages for that connection instead of slowing the sender down.
    pub outbound_queue: usize,

    pub fanout: FanoutPolicy,

    /// Default `tracing` filter when `RUST_LOG` is not set.
    pub log_level: String,
}

impl HubConfig {
    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("sweep_interval", self.sweep_interval),
            ("liveness_threshold", self.liveness_threshold),
            ("lock_timeout", self.lock_timeout),
        ];
        for (field, value) in non_zero {
            if value.is_zero() {
                return Err(ConfigError {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.outbound_queue == 0 {
            return Err(ConfigError {
                field: "outbound_queue",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for HubConfig {
    /// | Field              | Default          |
    /// |--------------------|------------------|
    /// | bind_addr          | `0.0.0.0:8080`   |
    /// | sweep_interval     | 15 seconds       |
    /// | liveness_threshold | 60 seconds       |
    /// | offline_grace      | 10 minutes       |
    /// | lock_timeout       | 5 seconds        |
    /// | outbound_queue     | 256 messages     |
    /// | fanout             | `watchers`       |
    /// | log_level          | `info`           |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            sweep_interval: Duration::from_secs(15),
            liveness_threshold: Duration::from_secs(60),
            offline_grace: Duration::from_secs(600),
            lock_timeout: Duration::from_secs(5),
            outbound_queue: 256,
            fanout: FanoutPolicy::Watchers,
            log_level: "info".to_string(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
