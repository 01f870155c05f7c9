//! Deadlines and cancellation for blocking waits
//!
//! Expect-style calls block until output arrives, a deadline elapses, or
//! the session is shut down. Instead of a timer thread flipping a shared
//! abort flag, every call computes a [`Deadline`] once on entry and passes
//! it, together with the session's [`StopSignal`], into the wait itself.
//! Dropping the wait future is the cancellation: there is no callback that
//! could still be running after the call returns, and a timed-out call
//! cannot leave stale abort state behind for the next one.

use crate::result::ExpectError;
use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// How long a blocking call may wait.
///
/// Constructed from seconds: `-1` and `0` mean "no deadline" (the wait is
/// bounded only by data arrival or shutdown), any positive value arms a
/// deadline, and anything below `-1` is rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Give up after this long.
    After(Duration),
}

impl Timeout {
    /// Build a timeout from seconds, validating the `-1` convention.
    ///
    /// Fractional values are accepted: `0.2` is 200 ms.
    ///
    /// # Errors
    ///
    /// [`ExpectError::InvalidTimeout`] for NaN, infinities, or values
    /// below `-1`.
    pub fn from_secs(secs: f64) -> Result<Self, ExpectError> {
        if !secs.is_finite() || secs < -1.0 {
            return Err(ExpectError::InvalidTimeout { value: secs });
        }
        if secs <= 0.0 {
            Ok(Timeout::Infinite)
        } else {
            Ok(Timeout::After(Duration::from_secs_f64(secs)))
        }
    }

    /// The armed duration, if any.
    pub fn armed(&self) -> Option<Duration> {
        match self {
            Timeout::Infinite => None,
            Timeout::After(d) => Some(*d),
        }
    }
}

/// Absolute point in time at which a blocking call gives up.
///
/// Computed once at call entry so that slow data arrival cannot push the
/// deadline out. A deadline built from [`Timeout::Infinite`] never expires.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// Start the clock for one blocking call.
    pub fn start(timeout: Timeout) -> Self {
        Deadline(timeout.armed().map(|d| Instant::now() + d))
    }

    /// Has the deadline passed?
    pub fn expired(&self) -> bool {
        match self.0 {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Time left before expiry, or `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Resolve when the deadline passes; never resolves when unbounded.
    pub async fn elapsed(&self) {
        match self.0 {
            Some(at) => tokio::time::sleep_until(at).await,
            None => pending().await,
        }
    }
}

/// Sticky session-wide shutdown signal.
///
/// `raise()` is idempotent and level-triggered: waits that are already
/// parked wake up, and any wait that starts afterwards returns immediately.
/// Shared by the session, its stream pipers, and every in-flight blocking
/// call.
#[derive(Debug, Default)]
pub struct StopSignal {
    raised: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    /// Create an unraised signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Safe to call multiple times and from any task.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Has shutdown been requested?
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested.
    pub async fn raised(&self) {
        if self.is_raised() {
            return;
        }
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register interest before the re-check: notify_waiters() wakes
        // only already-registered waiters, and raise() sets the flag
        // before notifying, so a raise in the gap cannot be missed.
        notified.as_mut().enable();
        if self.is_raised() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_timeout_validation() {
        assert!(matches!(Timeout::from_secs(5.0), Ok(Timeout::After(_))));
        assert_eq!(Timeout::from_secs(-1.0).unwrap(), Timeout::Infinite);
        assert_eq!(Timeout::from_secs(0.0).unwrap(), Timeout::Infinite);
        assert!(matches!(
            Timeout::from_secs(-2.0),
            Err(ExpectError::InvalidTimeout { .. })
        ));
        assert!(matches!(
            Timeout::from_secs(f64::NAN),
            Err(ExpectError::InvalidTimeout { .. })
        ));
    }

    #[test]
    fn test_timeout_fractional_seconds() {
        let timeout = Timeout::from_secs(0.2).unwrap();
        assert_eq!(timeout.armed(), Some(Duration::from_millis(200)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry() {
        let deadline = Deadline::start(Timeout::from_secs(1.0).unwrap());
        assert!(!deadline.expired());
        assert!(deadline.remaining().unwrap() <= Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_infinite_deadline_never_expires() {
        let deadline = Deadline::start(Timeout::Infinite);
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(!deadline.expired());
        assert_eq!(deadline.remaining(), None);
    }

    #[tokio::test]
    async fn test_stop_signal_wakes_waiter() {
        let stop = Arc::new(StopSignal::new());
        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.raised().await })
        };
        stop.raise();
        waiter.await.unwrap();
        assert!(stop.is_raised());
    }

    #[tokio::test]
    async fn test_stop_signal_is_sticky() {
        let stop = StopSignal::new();
        stop.raise();
        stop.raise();
        // A wait that starts after the raise returns immediately.
        stop.raised().await;
        assert!(stop.is_raised());
    }
}
