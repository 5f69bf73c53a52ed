//! Clock abstraction and expiry encoding.
//!
//! The store reads "now" through a [`Clock`] so tests and the trace simulator
//! can drive time explicitly with a [`ManualClock`].

use core::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Expiry values up to this many seconds (30 days) are relative to now.
pub const REALTIME_MAXDELTA: u32 = 60 * 60 * 24 * 30;

/// Source of the current time in unix seconds.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current unix time in seconds.
    fn now(&self) -> u32;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    /// Creates a clock reading `now`.
    pub fn new(now: u32) -> Self {
        Self {
            now: AtomicU32::new(now),
        }
    }

    /// Sets the current time.
    pub fn set(&self, now: u32) {
        self.now.store(now, Ordering::Release);
    }

    /// Moves the clock forward by `secs`.
    pub fn advance(&self, secs: u32) {
        self.now.fetch_add(secs, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u32 {
        self.now.load(Ordering::Acquire)
    }
}

/// Converts a protocol expiry into an absolute unix time.
///
/// `0` means never. Values up to [`REALTIME_MAXDELTA`] are offsets from
/// `now`; anything larger is already an absolute time. An absolute time that
/// is not in the future yields an item that is expired on arrival.
pub fn realtime(exptime: u32, now: u32) -> u32 {
    if exptime == 0 {
        0
    } else if exptime > REALTIME_MAXDELTA {
        exptime
    } else {
        now.saturating_add(exptime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime() {
        let now = 1_700_000_000;
        assert_eq!(realtime(0, now), 0);
        assert_eq!(realtime(60, now), now + 60);
        assert_eq!(realtime(REALTIME_MAXDELTA, now), now + REALTIME_MAXDELTA);
        assert_eq!(realtime(REALTIME_MAXDELTA + 1, now), REALTIME_MAXDELTA + 1);
        assert_eq!(realtime(now + 5, now), now + 5);
        assert_eq!(realtime(1, u32::MAX), u32::MAX);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now(), 100);
        clock.advance(5);
        assert_eq!(clock.now(), 105);
        clock.set(42);
        assert_eq!(clock.now(), 42);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01
        assert!(SystemClock.now() > 1_577_836_800);
    }
}
