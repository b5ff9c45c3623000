//! A mutex whose acquisition is bounded in time.
//!
//! # Why a bounded wait? (for beginners)
//!
//! Every router operation holds a lock for a few microseconds: a hash-map
//! lookup or insert, never any I/O.  If a task ever waits *seconds* for one of
//! these locks, something is holding it forever, which means a bug.  Rather
//! than hang every connection behind it, [`Guarded::lock`] gives up after the
//! configured timeout, logs at `error` level, and bumps the `lock_timeouts`
//! counter so the problem is visible.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;
use tracing::error;

use super::router::RouteError;
use super::stats::RouterStats;

/// A named `tokio::sync::Mutex` with a bounded acquisition time.
#[derive(Debug)]
pub struct Guarded<T> {
    name: &'static str,
    inner: Mutex<T>,
    wait: Duration,
    stats: Arc<RouterStats>,
}

impl<T> Guarded<T> {
    pub fn new(name: &'static str, value: T, wait: Duration, stats: Arc<RouterStats>) -> Self {
        Self {
            name,
            inner: Mutex::new(value),
            wait,
            stats,
        }
    }

    /// Acquires the lock, or fails with [`RouteError::LockTimeout`].
    pub async fn lock(&self) -> Result<MutexGuard<'_, T>, RouteError> {
        match timeout(self.wait, self.inner.lock()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                self.stats.record_lock_timeout();
                error!(
                    lock = self.name,
                    waited_ms = self.wait.as_millis() as u64,
                    "lock not acquired in time; a holder is likely stuck"
                );
                Err(RouteError::LockTimeout {
                    lock: self.name,
                    waited: self.wait,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_succeeds_when_free() {
        let stats = Arc::new(RouterStats::new());
        let guarded = Guarded::new("numbers", vec![1, 2], Duration::from_millis(50), stats);

        let guard = tokio_test::assert_ok!(guarded.lock().await);

        assert_eq!(*guard, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_lock_times_out_and_raises_alarm() {
        // Arrange: hold the lock for the whole test
        let stats = Arc::new(RouterStats::new());
        let guarded = Guarded::new("sessions", 0u32, Duration::from_millis(20), Arc::clone(&stats));
        let _held = guarded.lock().await.unwrap();

        // Act
        let err = tokio_test::assert_err!(guarded.lock().await);

        // Assert
        assert!(matches!(err, RouteError::LockTimeout { lock: "sessions", .. }));
        assert_eq!(stats.snapshot().lock_timeouts, 1);
    }
}
