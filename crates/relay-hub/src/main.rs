//! Device relay hub: entry point.
//!
//! This binary accepts WebSocket connections from phones ("producers") that
//! stream their screens, and from control panels ("observers") that watch
//! those streams and send taps and swipes back.  It routes messages between
//! them without ever looking inside a frame or a command.
//!
//! # Usage
//!
//! ```text
//! relay-hub [OPTIONS]
//!
//! Options:
//!   --config <PATH>               Optional TOML config file
//!   --bind <ADDR>                 WebSocket listen address [default: 0.0.0.0:8080]
//!   --sweep-interval <SECS>       Liveness sweep interval [default: 15]
//!   --liveness-threshold <SECS>   Idle time before a device goes Offline [default: 60]
//!   --offline-grace <SECS>        Offline time before an unwatched device is forgotten [default: 600]
//!   --lock-timeout-ms <MS>        Longest wait for a shared lock [default: 5000]
//!   --outbound-queue <N>          Per-connection outbound queue capacity [default: 256]
//!   --fanout <POLICY>             `watchers` or `all-observers` [default: watchers]
//!   --log-level <FILTER>          Log filter when RUST_LOG is unset [default: info]
//! ```
//!
//! # Where settings come from
//!
//! Lowest to highest precedence: built-in defaults, the `--config` file, then
//! command-line flags and their environment variables.
//!
//! | Variable                        | Flag                   |
//! |---------------------------------|------------------------|
//! | `RELAY_HUB_CONFIG`              | `--config`             |
//! | `RELAY_HUB_BIND`                | `--bind`               |
//! | `RELAY_HUB_SWEEP_INTERVAL`      | `--sweep-interval`     |
//! | `RELAY_HUB_LIVENESS_THRESHOLD`  | `--liveness-threshold` |
//! | `RELAY_HUB_OFFLINE_GRACE`       | `--offline-grace`      |
//! | `RELAY_HUB_LOCK_TIMEOUT_MS`     | `--lock-timeout-ms`    |
//! | `RELAY_HUB_OUTBOUND_QUEUE`      | `--outbound-queue`     |
//! | `RELAY_HUB_FANOUT`              | `--fanout`             |
//! | `RELAY_HUB_LOG_LEVEL`           | `--log-level`          |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use relay_hub::application::{LivenessMonitor, Router};
use relay_hub::domain::{FanoutPolicy, HubConfig};
use relay_hub::infrastructure::{run_server, ConfigFile};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket relay hub for device screen streaming and remote control.
///
/// Every option is optional: a flag that is not given leaves the value from
/// the config file, or the built-in default, in place.
#[derive(Debug, Default, Parser)]
#[command(
    name = "relay-hub",
    about = "WebSocket hub routing screen streams and control commands between devices and panels",
    version
)]
struct Cli {
    /// TOML file with hub settings.
    #[arg(long, env = "RELAY_HUB_CONFIG")]
    config: Option<PathBuf>,

    /// Address the WebSocket server listens on, e.g. `0.0.0.0:8080`.
    #[arg(long, env = "RELAY_HUB_BIND")]
    bind: Option<SocketAddr>,

    /// Seconds between liveness sweeps.
    #[arg(long, env = "RELAY_HUB_SWEEP_INTERVAL")]
    sweep_interval: Option<u64>,

    /// Seconds without traffic after which a device is marked Offline.
    #[arg(long, env = "RELAY_HUB_LIVENESS_THRESHOLD")]
    liveness_threshold: Option<u64>,

    /// Seconds an unwatched device stays listed after going Offline.
    #[arg(long, env = "RELAY_HUB_OFFLINE_GRACE")]
    offline_grace: Option<u64>,

    /// Milliseconds to wait for a shared lock before raising an alarm.
    #[arg(long, env = "RELAY_HUB_LOCK_TIMEOUT_MS")]
    lock_timeout_ms: Option<u64>,

    /// Capacity of each connection's outbound queue.
    #[arg(long, env = "RELAY_HUB_OUTBOUND_QUEUE")]
    outbound_queue: Option<usize>,

    /// Who receives frames: `watchers` or `all-observers`.
    #[arg(long, env = "RELAY_HUB_FANOUT")]
    fanout: Option<FanoutPolicy>,

    /// `tracing` filter used when `RUST_LOG` is not set.
    #[arg(long, env = "RELAY_HUB_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Builds the final [`HubConfig`]: defaults, then the config file, then
    /// flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// the merged configuration fails validation.
    fn into_hub_config(self) -> anyhow::Result<HubConfig> {
        let mut config = HubConfig::default();

        if let Some(path) = &self.config {
            let file = ConfigFile::load(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?;
            config = file.apply(config);
        }

        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(secs) = self.sweep_interval {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.liveness_threshold {
            config.liveness_threshold = Duration::from_secs(secs);
        }
        if let Some(secs) = self.offline_grace {
            config.offline_grace = Duration::from_secs(secs);
        }
        if let Some(ms) = self.lock_timeout_ms {
            config.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(capacity) = self.outbound_queue {
            config.outbound_queue = capacity;
        }
        if let Some(fanout) = self.fanout {
            config.fanout = fanout;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed with `clap` and merged with the optional
///    config file into a [`HubConfig`].
/// 2. `tracing_subscriber` is initialised.  `RUST_LOG` wins over the
///    configured log level when both are present.
/// 3. A Ctrl+C handler is spawned; it clears a shared `AtomicBool`.
/// 4. The [`LivenessMonitor`] is spawned on its own task.
/// 5. [`run_server`] accepts connections until the shutdown flag is cleared,
///    then closes every open connection so devices are marked Offline.
/// 6. The monitor is aborted and the router's counters are logged.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_hub_config()?;

    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        bind = %config.bind_addr,
        fanout = %config.fanout,
        sweep_interval_s = config.sweep_interval.as_secs(),
        liveness_threshold_s = config.liveness_threshold.as_secs(),
        "relay hub starting"
    );

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    // ── Router and liveness monitor ───────────────────────────────────────────
    let router = Arc::new(Router::with_system_clock(&config));
    let monitor = LivenessMonitor::new(Arc::clone(&router), &config).spawn(Arc::clone(&running));

    // ── Main server loop ──────────────────────────────────────────────────────
    let result = run_server(config.bind_addr, Arc::clone(&router), running).await;

    monitor.abort();
    info!(stats = %router.stats(), "relay hub stopped");
    result
}

// ── Tests ─────────────────────────────────────────────────────────────────────
