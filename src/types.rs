//! # Domain Types for sigma-xp
//!
//! This module defines the core types of the XP ledger: identifiers, the
//! fixed-point [`Xp`] quantity, the persisted entities ([`XpEvent`],
//! [`XpSnapshot`], [`StreakLog`]) and the ephemeral inputs describing the
//! action that triggered an award.
//!
//! ## Design Philosophy: Newtypes for Safety
//!
//! Identifiers are wrapped in single-field structs. A [`UserId`] cannot be
//! passed where an [`EventId`] is expected, and an [`Xp`] amount cannot be
//! confused with a page count.
//!
//! ## Invariants
//!
//! - [`EventId`]: strictly increasing, assigned by the store, never reused
//! - [`SnapshotSeq`]: 1, 2, 3, … per user, contiguous
//! - [`Xp`]: exact hundredths; only [`Xp::truncate`] loses precision

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Serialize, Serializer};

use crate::error::{Error, Result};

// =============================================================================
// Identifiers
// =============================================================================

/// The user an award belongs to.
///
/// Passed explicitly through every call; there is no ambient "current user".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Creates a user id from the identity system's integer key.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw integer for database storage.
    pub fn as_raw(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Position of an [`XpEvent`] in the ledger.
///
/// # Invariants
///
/// - Assigned by the store on append (`AUTOINCREMENT`), never reused
/// - Strictly increasing across all users
/// - Zero is a sentinel meaning "before the first event"; a snapshot-less
///   user folds from [`EventId::BEFORE_FIRST`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EventId(u64);

impl EventId {
    /// Sentinel preceding every real event id.
    pub const BEFORE_FIRST: EventId = EventId(0);

    /// Creates an event id from a raw value read from the database.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub fn as_raw(&self) -> u64 {
        self.0
    }

    /// Returns the value as SQLite's signed INTEGER.
    pub(crate) fn as_sql(&self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-user snapshot sequence number.
///
/// Contiguous from 1; [`SnapshotSeq::NONE`] (0) stands for "no snapshot yet"
/// so that `previous + 1` works without an `Option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SnapshotSeq(u64);

impl SnapshotSeq {
    /// No snapshot has been taken.
    pub const NONE: SnapshotSeq = SnapshotSeq(0);

    /// The first snapshot of a user.
    pub const FIRST: SnapshotSeq = SnapshotSeq(1);

    /// Creates a sequence number from a raw value.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub fn as_raw(&self) -> u64 {
        self.0
    }

    /// Returns the following sequence number.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SnapshotSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Soft reference to the action that caused an award.
///
/// What it points at depends on the [`ExpEventType`]: a reading report id, a
/// daily-read id or a streak-log id. No foreign key is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RefId(i64);

impl RefId {
    /// Creates a reference id.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw integer.
    pub fn as_raw(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Xp - Fixed-Point Experience Points
// =============================================================================

/// An amount of experience points, stored as exact hundredths.
///
/// # Why Not f64?
///
/// Reading XP is 0.1 per page. Summing thousands of `0.1`s in binary floating
/// point drifts; summing integer hundredths does not. The ledger column is an
/// INTEGER count of hundredths, mirroring a `decimal(18,2)`.
///
/// Truncation to whole points happens only at the read boundary
/// ([`Xp::truncate`]), never while accumulating.
///
/// # Example
///
/// ```rust
/// use sigma_xp::types::Xp;
///
/// let per_page: Xp = "0.1".parse()?;
/// assert_eq!(per_page.times(50), Xp::from_whole(5));
/// assert_eq!(Xp::from_hundredths(1999).truncate(), 19);
/// # Ok::<(), sigma_xp::Error>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Xp(i64);

impl Xp {
    /// Zero XP.
    pub const ZERO: Xp = Xp(0);

    /// Hundredths per whole point.
    const SCALE: i64 = 100;

    /// Creates an amount from whole points.
    pub const fn from_whole(points: i64) -> Self {
        Self(points * Self::SCALE)
    }

    /// Creates an amount from hundredths of a point.
    pub const fn from_hundredths(hundredths: i64) -> Self {
        Self(hundredths)
    }

    /// Returns the amount in hundredths (the storage representation).
    pub fn as_hundredths(&self) -> i64 {
        self.0
    }

    /// Multiplies a per-unit amount by a count (e.g. XP per page × pages).
    pub fn times(&self, count: i64) -> Self {
        Self(self.0 * count)
    }

    /// Returns true for exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Drops the fractional part, rounding toward zero.
    pub fn truncate(&self) -> i64 {
        self.0 / Self::SCALE
    }
}

impl Add for Xp {
    type Output = Xp;

    fn add(self, rhs: Xp) -> Xp {
        Xp(self.0 + rhs.0)
    }
}

impl AddAssign for Xp {
    fn add_assign(&mut self, rhs: Xp) {
        self.0 += rhs.0;
    }
}

impl Sum for Xp {
    fn sum<I: Iterator<Item = Xp>>(iter: I) -> Xp {
        iter.fold(Xp::ZERO, Add::add)
    }
}

impl fmt::Display for Xp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl FromStr for Xp {
    type Err = Error;

    /// Parses `"12"`, `"12.5"`, `"-0.25"`. More than two fractional digits is
    /// rejected rather than rounded.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidXp(s.to_string());

        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };

        if whole.is_empty() || frac.len() > 2 {
            return Err(invalid());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };

        let hundredths = whole
            .checked_mul(Self::SCALE)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(invalid)?;

        Ok(Self(if negative { -hundredths } else { hundredths }))
    }
}

impl Serialize for Xp {
    /// Serialized as a decimal string so no consumer sees a float.
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// =============================================================================
// Award Types
// =============================================================================

/// The closed set of reasons an [`XpEvent`] can be recorded for.
///
/// Stored as its name in `xp_events.event_name`. Reading back a name that is
/// not listed here is a programming error ([`Error::UnknownEventName`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExpEventType {
    /// Pages read in a reading report.
    ReadingExp,
    /// First pass of a daily-read quiz.
    DailyReadsExp,
    /// Streak length reached a multiple of the bonus interval.
    StreakExp,
    /// A non-recommended book was finished.
    BookCompleted,
    /// A catalogued recommendation was finished.
    RecommendedBookCompleted,
}

impl ExpEventType {
    /// Every award type, in declaration order.
    pub const ALL: [ExpEventType; 5] = [
        ExpEventType::ReadingExp,
        ExpEventType::DailyReadsExp,
        ExpEventType::StreakExp,
        ExpEventType::BookCompleted,
        ExpEventType::RecommendedBookCompleted,
    ];

    /// Returns the stored name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpEventType::ReadingExp => "ReadingExp",
            ExpEventType::DailyReadsExp => "DailyReadsExp",
            ExpEventType::StreakExp => "StreakExp",
            ExpEventType::BookCompleted => "BookCompleted",
            ExpEventType::RecommendedBookCompleted => "RecommendedBookCompleted",
        }
    }
}

impl fmt::Display for ExpEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpEventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::UnknownEventName(s.to_string()))
    }
}

// =============================================================================
// Persisted Entities
// =============================================================================

/// An immutable fact: `user_id` was awarded `amount` because of `ref_id`.
///
/// Created once, by a handler, inside the unit of work of the triggering
/// action. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XpEvent {
    /// Ledger position, assigned on append.
    pub id: EventId,
    /// Subject of the award.
    pub user_id: UserId,
    /// Awarded amount (non-negative in practice, not enforced here).
    pub amount: Xp,
    /// Why the award was made.
    pub event_type: ExpEventType,
    /// Which action caused it; meaning depends on `event_type`.
    pub ref_id: RefId,
    /// When the award was appended.
    pub created_at: DateTime<Utc>,
}

/// A checkpoint folding every event up to `last_event_id` into `exp`.
///
/// A new snapshot supersedes the previous one; none is ever edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XpSnapshot {
    /// Row id.
    pub id: i64,
    /// Whose total this is.
    pub user_id: UserId,
    /// 1, 2, 3, … for this user.
    pub snapshot_seq: SnapshotSeq,
    /// Highest event id folded into `exp`.
    pub last_event_id: EventId,
    /// Cumulative total through `last_event_id`.
    pub exp: Xp,
}

/// One qualifying calendar day for a user.
///
/// At most one row per `(user_id, streak_date)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreakLog {
    /// Row id; used as the StreakExp reference.
    pub id: i64,
    /// Whose streak this day belongs to.
    pub user_id: UserId,
    /// User-local calendar date.
    pub streak_date: NaiveDate,
}

// =============================================================================
// Trigger Inputs (not persisted by the core)
// =============================================================================
// These describe the action an excluded collaborator already persisted. They
// travel inside domain events so the rules never read the collaborator's tables.

/// A book or journal a user is reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingResource {
    /// Resource id.
    pub id: i64,
    /// Total page count; zero means "unknown", which never completes.
    pub total_pages: u32,
    /// ISBN used to match the recommendation catalogue.
    pub isbn: Option<String>,
}

/// A progress report filed by a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingReport {
    /// Report id; the ReadingExp / BookCompleted reference.
    pub id: i64,
    /// Who filed the report.
    pub user_id: UserId,
    /// Page the user reports being on.
    pub current_page: u32,
    /// What is being read.
    pub resource: ReadingResource,
}

impl ReadingReport {
    /// Returns true if the report reaches the last page of a resource with a
    /// known page count.
    pub fn completes_resource(&self) -> bool {
        self.resource.total_pages > 0 && self.current_page >= self.resource.total_pages
    }
}

/// A daily reading with an attached quiz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyRead {
    /// Daily-read id; the DailyReadsExp reference.
    pub id: i64,
    /// XP granted on the first pass; zero disables the award.
    pub exp: Xp,
    /// Correct answers needed to pass.
    pub minimal_correct_answer: u32,
}

/// A quiz question of a daily read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizQuestion {
    /// Position of the question in the quiz.
    pub question_seq: u32,
    /// Expected answer, compared case-insensitively.
    pub correct_answer: String,
}

/// One submitted answer; retries of the same question increase `retry_seq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizAnswer {
    /// Which question this answers.
    pub question_seq: u32,
    /// Attempt number for that question.
    pub retry_seq: u32,
    /// What the user answered.
    pub answer: String,
}

// =============================================================================
// Tests
// =============================================================================
