//! Monotonic timestamps.
//!
//! Wall-clock time is out of scope: every deadline in this crate is
//! expressed against [`std::time::Instant`], which on every supported
//! target is backed by a monotonic clock source. All arithmetic here is
//! overflow-checked rather than saturating: a deadline that would overflow
//! the representable range is a caller bug, not a silently clamped value,
//! so it surfaces as [`Error::ClockRange`].

use crate::error::{Error, Result};
use std::time::{Duration, Instant};

/// A monotonic point in time, nanosecond resolution (inherited from
/// `Instant`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Instant);

impl Timestamp {
    /// Samples the monotonic clock now.
    pub fn now() -> Timestamp {
        Timestamp(Instant::now())
    }

    /// `self + duration`, checked.
    pub fn add(self, duration: Duration) -> Result<Timestamp> {
        self.0
            .checked_add(duration)
            .map(Timestamp)
            .ok_or(Error::ClockRange)
    }

    /// `self - duration`, checked.
    pub fn sub(self, duration: Duration) -> Result<Timestamp> {
        self.0
            .checked_sub(duration)
            .map(Timestamp)
            .ok_or(Error::ClockRange)
    }

    /// `a` strictly precedes `b`.
    pub fn is_before(a: Timestamp, b: Timestamp) -> bool {
        a.0 < b.0
    }

    /// `a` strictly follows `b`.
    pub fn is_after(a: Timestamp, b: Timestamp) -> bool {
        a.0 > b.0
    }

    /// Saturating duration from `earlier` to `self`; zero if `self` is not
    /// after `earlier`. Used to compute backend wait timeouts, where a
    /// negative distance simply means "don't wait".
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }

    pub(crate) fn into_instant(self) -> Instant {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_round_trips() {
        let t0 = Timestamp::now();
        let t1 = t0.add(Duration::from_millis(10)).unwrap();
        assert!(Timestamp::is_before(t0, t1));
        assert!(Timestamp::is_after(t1, t0));
        assert!(!Timestamp::is_before(t1, t0));
    }

    #[test]
    fn sub_then_add_recovers() {
        let t0 = Timestamp::now();
        let d = Duration::from_millis(5);
        let t1 = t0.add(d).unwrap();
        let back = t1.sub(d).unwrap();
        assert_eq!(back, t0);
    }

    #[test]
    fn saturating_distance_never_panics_when_reversed() {
        let t0 = Timestamp::now();
        let t1 = t0.add(Duration::from_millis(1)).unwrap();
        assert_eq!(t0.saturating_duration_since(t1), Duration::ZERO);
    }
}
