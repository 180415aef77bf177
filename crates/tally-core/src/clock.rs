//! Wall-clock access and audit-log timestamp allocation.

use chrono::{DateTime, Duration, Utc};
use std::cell::Cell;
use std::rc::Rc;

/// Source of the current time.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    /// Start at a fixed instant in milliseconds since the epoch.
    #[must_use]
    pub fn at_millis(millis: i64) -> Self {
        Self::new(DateTime::from_timestamp_millis(millis).unwrap_or_default())
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

/// Shared clocks, so a test can keep advancing a clock an engine owns.
impl<C: Clock + ?Sized> Clock for Rc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Hands out strictly increasing entry timestamps within one mutation.
///
/// A `Created` entry must sort before the entry it causes. Ties are broken
/// by explicit millisecond offsets, never by insertion order:
/// [`Timeline::before`] returns instants before the mutation's base time and
/// [`Timeline::next`] returns the base time and then one millisecond later
/// per call.
#[derive(Debug, Clone)]
pub struct Timeline {
    base: DateTime<Utc>,
    earlier: i64,
    later: i64,
}

impl Timeline {
    #[must_use]
    pub const fn new(base: DateTime<Utc>) -> Self {
        Self {
            base,
            earlier: 0,
            later: 0,
        }
    }

    /// The instant the mutation started.
    #[must_use]
    pub const fn base(&self) -> DateTime<Utc> {
        self.base
    }

    /// Instant for a `Created` entry: strictly before every [`Timeline::next`].
    pub fn before(&mut self) -> DateTime<Utc> {
        self.earlier += 1;
        self.base - Duration::milliseconds(self.earlier)
    }

    /// Instant for a caused entry.
    pub fn next(&mut self) -> DateTime<Utc> {
        let at = self.base + Duration::milliseconds(self.later);
        self.later += 1;
        at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_entries_precede_caused_entries() {
        let clock = ManualClock::at_millis(1_700_000_000_000);
        let mut timeline = Timeline::new(clock.now());
        let caused = timeline.next();
        let created = timeline.before();
        let created_again = timeline.before();
        let later = timeline.next();

        assert!(created < caused);
        assert!(created_again < created);
        assert!(caused < later);
        assert_eq!(caused, clock.now());
        assert_eq!(caused - created, Duration::milliseconds(1));
    }

    #[test]
    fn manual_clock_advances_on_demand() {
        let clock = ManualClock::at_millis(0);
        clock.advance(Duration::seconds(5));
        assert_eq!(clock.now().timestamp(), 5);
    }
}
