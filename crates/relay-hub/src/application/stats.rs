//! Router counters.
//!
//! Plain atomics, bumped with `Relaxed` ordering: the numbers are for humans
//! reading the shutdown log and for tests, not for synchronisation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the router and its lock guards.
#[derive(Debug, Default)]
pub struct RouterStats {
    frames_fanned_out: AtomicU64,
    deliveries: AtomicU64,
    controls_delivered: AtomicU64,
    controls_dropped: AtomicU64,
    queue_full_drops: AtomicU64,
    malformed: AtomicU64,
    lock_timeouts: AtomicU64,
}

/// Point-in-time copy of [`RouterStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Frame and layout messages accepted from an authoritative producer.
    pub frames_fanned_out: u64,
    /// Individual observer deliveries of those messages.
    pub deliveries: u64,
    pub controls_delivered: u64,
    /// Control commands for unknown or Offline devices.
    pub controls_dropped: u64,
    /// Messages dropped because a connection's outbound queue was full.
    pub queue_full_drops: u64,
    /// Undecodable messages and messages sent by the wrong role.
    pub malformed: u64,
    pub lock_timeouts: u64,
}

impl RouterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fanout(&self, deliveries: usize) {
        self.frames_fanned_out.fetch_add(1, Ordering::Relaxed);
        self.deliveries
            .fetch_add(deliveries as u64, Ordering::Relaxed);
    }

    pub fn record_control(&self, delivered: bool) {
        let counter = if delivered {
            &self.controls_delivered
        } else {
            &self.controls_dropped
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_full(&self, dropped: usize) {
        self.queue_full_drops
            .fetch_add(dropped as u64, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_fanned_out: self.frames_fanned_out.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            controls_delivered: self.controls_delivered.load(Ordering::Relaxed),
            controls_dropped: self.controls_dropped.load(Ordering::Relaxed),
            queue_full_drops: self.queue_full_drops.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames={} deliveries={} controls_delivered={} controls_dropped={} \
             queue_full_drops={} malformed={} lock_timeouts={}",
            self.frames_fanned_out,
            self.deliveries,
            self.controls_delivered,
            self.controls_dropped,
            self.queue_full_drops,
            self.malformed,
            self.lock_timeouts
        )
    }
}
