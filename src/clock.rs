//! # Time Source
//!
//! "Now" and "today" come from a [`mockable::Clock`] handed to the store at
//! construction, never from the system clock directly. Production code uses
//! [`DefaultClock`]; tests use [`MutableClock`] to walk across days.
//!
//! ## User-Local Calendar
//!
//! Streak days and weekly status are calendar dates in the users' timezone, a
//! fixed offset from UTC (see `XpConfig::utc_offset_minutes`):
//!
//! ```text
//! utc()  2026-03-01T17:30Z ──(+08:00)──► 2026-03-02T01:30 ──► today = 2026-03-02
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, FixedOffset, Local, NaiveDate, TimeDelta, Utc};

pub use mockable::{Clock, DefaultClock};

/// Clock shared between the API handle and the writer thread.
pub type SharedClock = Arc<dyn Clock + Send + Sync>;

/// Returns the system clock as a [`SharedClock`].
pub fn system_clock() -> SharedClock {
    Arc::new(DefaultClock)
}

/// Returns the calendar date of `instant` in the given offset.
pub fn local_date(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    instant.with_timezone(&offset).date_naive()
}

/// Returns "today" in the users' calendar.
pub fn user_today(clock: &dyn Clock, offset: FixedOffset) -> NaiveDate {
    local_date(clock.utc(), offset)
}

/// A clock that only moves when told to.
///
/// # Example
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use sigma_xp::clock::{Clock, MutableClock};
///
/// let clock = MutableClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
/// clock.advance_days(2);
/// assert_eq!(clock.utc(), Utc.with_ymd_and_hms(2026, 3, 3, 0, 0, 0).unwrap());
/// ```
#[derive(Debug)]
pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    /// Creates a clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.lock_clock() = now;
    }

    /// Moves the clock forward by whole days.
    pub fn advance_days(&self, days: i64) {
        *self.lock_clock() += TimeDelta::days(days);
    }

    /// Moves the clock forward by seconds.
    pub fn advance_seconds(&self, seconds: i64) {
        *self.lock_clock() += TimeDelta::seconds(seconds);
    }

    fn lock_clock(&self) -> MutexGuard<'_, DateTime<Utc>> {
        // A poisoned guard still holds a valid instant.
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.lock_clock()
    }
}
