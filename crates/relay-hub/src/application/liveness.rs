//! Liveness monitor: the periodic sweep that notices silent devices.
//!
//! A phone whose Wi-Fi drops may never send a TCP FIN, so the hub cannot rely
//! on disconnect events alone.  Every `sweep_interval` the monitor asks the
//! router to mark devices with no traffic for longer than
//! `liveness_threshold` Offline, then to forget Offline devices nobody watches
//! once `offline_grace` has passed.
//!
//! # No overlapping sweeps
//!
//! The task runs each tick to completion before awaiting the next one, and the
//! interval uses [`MissedTickBehavior::Skip`]: if a sweep ever takes longer
//! than the interval, the missed ticks are dropped instead of firing in a
//! burst.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use relay_core::DeviceId;

use super::router::{RouteError, Router};
use crate::domain::HubConfig;

/// What one tick changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Devices that went Offline for lack of activity.
    pub expired: Vec<DeviceId>,
    /// Offline devices removed from the registry.
    pub collected: Vec<DeviceId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.collected.is_empty()
    }
}

/// Periodic sweeper over a shared [`Router`].
pub struct LivenessMonitor {
    router: Arc<Router>,
    sweep_interval: Duration,
    threshold: Duration,
    grace: Duration,
}

impl LivenessMonitor {
    pub fn new(router: Arc<Router>, config: &HubConfig) -> Self {
        Self {
            router,
            sweep_interval: config.sweep_interval,
            threshold: config.liveness_threshold,
            grace: config.offline_grace,
        }
    }

    /// Runs one sweep followed by one garbage-collection pass.
    pub async fn tick(&self) -> Result<SweepReport, RouteError> {
        let expired = self.router.sweep_expired(self.threshold).await?;
        let collected = self.router.collect_garbage(self.grace).await?;
        Ok(SweepReport { expired, collected })
    }

    /// Spawns the monitor as a background task.
    ///
    /// The task stops on its own once `running` is cleared; the caller may
    /// also abort the returned handle for an immediate stop.
    pub fn spawn(self, running: Arc<AtomicBool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            // The first tick completes immediately; nothing can be stale yet.
            ticker.tick().await;

            info!(
                interval_ms = self.sweep_interval.as_millis() as u64,
                threshold_ms = self.threshold.as_millis() as u64,
                "liveness monitor started"
            );

            while running.load(Ordering::Relaxed) {
                ticker.tick().await;
                match self.tick().await {
                    Ok(report) if report.is_empty() => debug!("liveness sweep: no changes"),
                    Ok(report) => info!(
                        expired = report.expired.len(),
                        collected = report.collected.len(),
                        "liveness sweep applied"
                    ),
                    // Already logged and counted by the lock guard; try again next tick.
                    Err(e) => error!("liveness sweep failed: {e}"),
                }
            }

            debug!("liveness monitor stopped");
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
