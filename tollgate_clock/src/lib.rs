//! Millisecond-resolution time for credential lifetimes
//!
//! Token expiries handed out by `tollgate` are persisted as epoch milliseconds,
//! so the types here carry milliseconds rather than seconds. The [`Clock`]
//! trait lets callers swap the system clock for a [`TestClock`] that can be
//! advanced deterministically and shared between the code under test and
//! the test itself.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_must_use
)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

use std::{
    fmt, ops,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Unix time in milliseconds
///
/// The number of milliseconds elapsed since the beginning of the Unix epoch
/// on 1970/01/01 at 00:00:00 UTC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct UnixMillis(pub u64);

impl UnixMillis {
    /// Whole seconds since the epoch, rounding down
    #[inline]
    #[must_use]
    pub const fn as_secs(self) -> u64 {
        self.0 / 1000
    }

    /// Constructs a time from whole seconds since the epoch
    #[inline]
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// Subtracts a duration, stopping at the epoch
    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, d: DurationMillis) -> Self {
        Self(self.0.saturating_sub(d.0))
    }
}

impl From<SystemTime> for UnixMillis {
    #[inline]
    fn from(t: SystemTime) -> Self {
        let millis = t
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        UnixMillis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for UnixMillis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl ops::Add<DurationMillis> for UnixMillis {
    type Output = UnixMillis;

    #[inline]
    fn add(self, rhs: DurationMillis) -> Self::Output {
        UnixMillis(self.0.saturating_add(rhs.0))
    }
}

impl ops::AddAssign<DurationMillis> for UnixMillis {
    #[inline]
    fn add_assign(&mut self, rhs: DurationMillis) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl ops::Sub for UnixMillis {
    type Output = DurationMillis;

    /// The time elapsed between two instants, zero if `rhs` is later
    #[inline]
    fn sub(self, rhs: UnixMillis) -> Self::Output {
        DurationMillis(self.0.saturating_sub(rhs.0))
    }
}

/// A span of time in milliseconds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct DurationMillis(pub u64);

impl DurationMillis {
    /// A zero-length duration
    pub const ZERO: Self = Self(0);

    /// Constructs a duration from whole seconds
    #[inline]
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// Constructs a duration from whole minutes
    #[inline]
    #[must_use]
    pub const fn from_mins(mins: u64) -> Self {
        Self::from_secs(mins.saturating_mul(60))
    }

    /// Constructs a duration from whole hours
    #[inline]
    #[must_use]
    pub const fn from_hours(hours: u64) -> Self {
        Self::from_mins(hours.saturating_mul(60))
    }

    /// Whole seconds in the duration, rounding down
    #[inline]
    #[must_use]
    pub const fn as_secs(self) -> u64 {
        self.0 / 1000
    }
}

impl ops::Add for DurationMillis {
    type Output = DurationMillis;

    #[inline]
    fn add(self, rhs: DurationMillis) -> Self::Output {
        DurationMillis(self.0.saturating_add(rhs.0))
    }
}

impl From<DurationMillis> for Duration {
    #[inline]
    fn from(d: DurationMillis) -> Self {
        Duration::from_millis(d.0)
    }
}

impl From<Duration> for DurationMillis {
    #[inline]
    fn from(d: Duration) -> Self {
        DurationMillis(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
impl Serialize for UnixMillis {
    #[inline]
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
impl<'de> Deserialize<'de> for UnixMillis {
    #[inline]
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = u64::deserialize(deserializer)?;
        Ok(Self(s))
    }
}

#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
impl Serialize for DurationMillis {
    #[inline]
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
impl<'de> Deserialize<'de> for DurationMillis {
    #[inline]
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = u64::deserialize(deserializer)?;
        Ok(Self(s))
    }
}

/// Represents a clock, which can tell the current time
pub trait Clock {
    /// Gets the current time according to this clock
    fn now(&self) -> UnixMillis;
}

impl<C: Clock + ?Sized> Clock for &C {
    #[inline]
    fn now(&self) -> UnixMillis {
        (**self).now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    #[inline]
    fn now(&self) -> UnixMillis {
        (**self).now()
    }
}

/// The system clock as provided by `std::time::SystemTime`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct System;

impl Clock for System {
    #[inline]
    fn now(&self) -> UnixMillis {
        UnixMillis::from(SystemTime::now())
    }
}

/// A test clock which maintains the current time as shared internal state
///
/// Clones observe the same time, so a clone handed to the code under test
/// moves whenever the test advances its own copy.
#[derive(Clone, Debug, Default)]
pub struct TestClock(Arc<AtomicU64>);

impl Clock for TestClock {
    #[inline]
    fn now(&self) -> UnixMillis {
        UnixMillis(self.0.load(Ordering::SeqCst))
    }
}

impl TestClock {
    /// Creates a new test clock with the specified time
    #[inline]
    pub fn new(time: UnixMillis) -> Self {
        Self(Arc::new(AtomicU64::new(time.0)))
    }

    /// Updates the clock's current time to `val`
    pub fn set(&self, val: UnixMillis) {
        self.0.store(val.0, Ordering::SeqCst);
    }

    /// Advances the clock's current time by `inc`
    pub fn advance(&self, inc: DurationMillis) {
        self.0.fetch_add(inc.0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_clones_share_time() {
        let clock = TestClock::new(UnixMillis(1_000));
        let observer = clock.clone();

        clock.advance(DurationMillis::from_secs(5));
        assert_eq!(observer.now(), UnixMillis(6_000));

        observer.set(UnixMillis(42));
        assert_eq!(clock.now(), UnixMillis(42));
    }

    #[test]
    fn arithmetic_saturates() {
        assert_eq!(UnixMillis(5) - UnixMillis(10), DurationMillis::ZERO);
        assert_eq!(UnixMillis(u64::MAX) + DurationMillis(1), UnixMillis(u64::MAX));
        assert_eq!(
            DurationMillis::from_hours(1) + DurationMillis(1),
            DurationMillis(3_600_001)
        );
        assert_eq!(
            DurationMillis(u64::MAX) + DurationMillis(1),
            DurationMillis(u64::MAX)
        );
        assert_eq!(
            UnixMillis(500).saturating_sub(DurationMillis::from_secs(1)),
            UnixMillis(0)
        );
    }

    #[test]
    fn unit_conversions() {
        assert_eq!(DurationMillis::from_hours(1), DurationMillis(3_600_000));
        assert_eq!(DurationMillis::from_hours(24), DurationMillis(86_400_000));
        assert_eq!(DurationMillis::from_mins(10).as_secs(), 600);
        assert_eq!(UnixMillis(1_999).as_secs(), 1);
        assert_eq!(UnixMillis::from_secs(3), UnixMillis(3_000));
        assert_eq!(
            Duration::from(DurationMillis(1_500)),
            Duration::from_millis(1_500)
        );
    }

    #[test]
    fn system_clock_is_after_epoch() {
        assert!(System.now() > UnixMillis::from_secs(1_600_000_000));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serializes_as_bare_number() {
        let json = serde_json::to_string(&UnixMillis(1_700_000_000_123)).unwrap();
        assert_eq!(json, "1700000000123");
        let back: DurationMillis = serde_json::from_str("250").unwrap();
        assert_eq!(back, DurationMillis(250));
    }
}
