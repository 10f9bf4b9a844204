//! Time sources for attempt timestamps and store-side expiry.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Wall-clock time as a duration since the UNIX epoch.
///
/// Attempt scores are taken from this clock, so every process sharing a store
/// must use clocks that agree closely enough for the configured window.
pub trait Clock: Send + Sync {
    /// Current time since the UNIX epoch.
    fn now(&self) -> Duration;

    /// Current time in fractional seconds since the UNIX epoch.
    fn now_secs_f64(&self) -> f64 {
        self.now().as_secs_f64()
    }
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        // A clock set before 1970 reads as the epoch itself.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

/// A clock that only moves when told to. Microsecond resolution.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `start` since the epoch.
    pub fn new(start: Duration) -> Self {
        Self {
            micros: AtomicU64::new(start.as_micros() as u64),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }

    /// Set the clock to an absolute reading.
    pub fn set(&self, now: Duration) {
        self.micros.store(now.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::SeqCst))
    }
}
