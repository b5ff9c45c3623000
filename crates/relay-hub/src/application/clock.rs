//! Time source used by the router and the liveness monitor.
//!
//! Liveness decisions compare "now" with a session's last activity.  Reading
//! the time through a trait lets unit tests jump the clock forward by minutes
//! without sleeping.

use std::time::Instant;

/// A monotonic time source.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The real clock, backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
