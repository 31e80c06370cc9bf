//! A monotonic clock and duration type used throughout the engines.
//!
//! The protocol state machines only ever care about two operations: "how
//! long until this timer fires" and "has this timer fired yet". Both are
//! expressed in milliseconds. Embedded `smoltcp`-derived code traditionally
//! keeps this as a wrapping 32-bit counter; we widen it to 64 bits so that
//! lease-time arithmetic (`lease_time_secs * 1000`) never truncates for the
//! multi-decade lifetimes RFC 2131/3315 permit (see design note on integer
//! truncation) while keeping the same `Instant`/`Duration` call shape.

use core::fmt;
use core::ops::{Add, AddAssign, Sub, SubAssign};

/// A point in monotonic time, in milliseconds since an arbitrary epoch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant {
    millis: i64,
}

impl Instant {
    pub const ZERO: Instant = Instant { millis: 0 };

    pub const fn from_millis(millis: i64) -> Instant {
        Instant { millis }
    }

    pub const fn from_secs(secs: i64) -> Instant {
        Instant { millis: secs * 1000 }
    }

    pub fn total_millis(&self) -> i64 {
        self.millis
    }

    pub fn checked_duration_since(&self, earlier: Instant) -> Option<Duration> {
        if self.millis < earlier.millis {
            None
        } else {
            Some(Duration::from_millis((self.millis - earlier.millis) as u64))
        }
    }

    /// Saturating duration since `earlier`; `Duration::ZERO` if `earlier` is later.
    pub fn saturating_duration_since(&self, earlier: Instant) -> Duration {
        self.checked_duration_since(earlier).unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}ms", self.millis)
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;
    fn add(self, rhs: Duration) -> Instant {
        Instant::from_millis(self.millis + rhs.millis as i64)
    }
}

impl AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        self.millis += rhs.millis as i64;
    }
}

impl Sub<Duration> for Instant {
    type Output = Instant;
    fn sub(self, rhs: Duration) -> Instant {
        Instant::from_millis(self.millis - rhs.millis as i64)
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;
    fn sub(self, rhs: Instant) -> Duration {
        Duration::from_millis((self.millis - rhs.millis).max(0) as u64)
    }
}

/// A span of time, in milliseconds. Always non-negative.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration {
    millis: u64,
}

impl Duration {
    pub const ZERO: Duration = Duration { millis: 0 };

    pub const fn from_millis(millis: u64) -> Duration {
        Duration { millis }
    }

    pub const fn from_secs(secs: u64) -> Duration {
        Duration { millis: secs * 1000 }
    }

    pub fn total_millis(&self) -> u64 {
        self.millis
    }

    pub fn secs(&self) -> u64 {
        self.millis / 1000
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}ms", self.millis)
    }
}

impl Add for Duration {
    type Output = Duration;
    fn add(self, rhs: Duration) -> Duration {
        Duration::from_millis(self.millis + rhs.millis)
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Duration) {
        self.millis += rhs.millis;
    }
}

impl Sub for Duration {
    type Output = Duration;
    fn sub(self, rhs: Duration) -> Duration {
        Duration::from_millis(self.millis.saturating_sub(rhs.millis))
    }
}

impl SubAssign for Duration {
    fn sub_assign(&mut self, rhs: Duration) {
        self.millis = self.millis.saturating_sub(rhs.millis);
    }
}

impl core::ops::Mul<u64> for Duration {
    type Output = Duration;
    fn mul(self, rhs: u64) -> Duration {
        Duration::from_millis(self.millis * rhs)
    }
}

impl core::ops::Div<u64> for Duration {
    type Output = Duration;
    fn div(self, rhs: u64) -> Duration {
        Duration::from_millis(self.millis / rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_since_saturates_on_rewind() {
        let a = Instant::from_millis(100);
        let b = Instant::from_millis(150);
        assert_eq!(b.saturating_duration_since(a), Duration::from_millis(50));
        assert_eq!(a.saturating_duration_since(b), Duration::ZERO);
    }

    #[test]
    fn lease_arithmetic_does_not_truncate() {
        // ~136 years in seconds; would overflow a 32-bit millisecond product.
        let lease_secs: i64 = 0x0FFF_FFFF;
        let start = Instant::from_millis(0);
        let expires = start + Duration::from_secs(lease_secs as u64);
        assert_eq!(expires.total_millis(), lease_secs * 1000);
    }
}
