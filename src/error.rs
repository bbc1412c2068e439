//! # Error Handling for sigma-xp
//!
//! This module defines the error type used throughout the crate. A single
//! error enum ([`Error`]) represents every failure mode, so callers in the
//! endpoint layer can match on one type and decide what the user sees.
//!
//! ## Rust Pattern: thiserror
//!
//! We use the `thiserror` crate to derive `std::error::Error` implementations:
//! - `Display` comes from the `#[error(...)]` attributes
//! - `From<rusqlite::Error>` comes from `#[from]`, so `?` converts storage errors
//!
//! ## What Is NOT an Error
//!
//! Guard no-ops are deliberately absent from this enum. An award that was
//! already granted, a book completion inside its cooldown, or a quiz below the
//! pass mark are all "no award" outcomes. Accrual rules return `None` for them.
//!
//! ## Error Categories
//!
//! | Category | Variants | Typical Response |
//! |----------|----------|------------------|
//! | Storage | `Sqlite`, `Schema`, `RollbackFailed` | Roll back the unit of work, surface a failure |
//! | Conflict | `StreakConflict` | Surface as a user-visible conflict |
//! | Programming | `UnknownEventName`, `DispatchDepthExceeded` | Fail fast, fix the code |
//! | Caller | `InvalidPage`, `InvalidXp`, `Config` | Reject the input |
//! | Cancellation | `Cancelled` | Nothing was persisted; drop the request |

use chrono::NaiveDate;
use thiserror::Error;

use crate::types::UserId;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in sigma-xp operations.
///
/// # Example
///
/// ```rust,ignore
/// use sigma_xp::{Error, Result};
///
/// fn example(store: &mut XpStore) -> Result<()> {
///     match store.submit(trigger, &cancel) {
///         Err(Error::StreakConflict { .. }) => { /* another request won */ }
///         other => { other?; }
///     }
///     Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Storage Errors (the unit of work is rolled back)
    // =========================================================================
    /// SQLite operation failed.
    ///
    /// This wraps any error from the `rusqlite` crate: a locked database file,
    /// a full disk, I/O failure. No retries happen at this layer; the caller's
    /// unit of work is rolled back and the caller decides.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema version mismatch, corrupted rows, or a writer that has gone away.
    #[error("schema error: {0}")]
    Schema(String),

    /// A unit of work failed and rolling it back failed too.
    ///
    /// `cause` is the failure that triggered the rollback. The connection's
    /// transaction state is unknown afterwards.
    #[error("rollback after '{cause}' failed: {rollback}")]
    RollbackFailed {
        /// Error from `ROLLBACK TO` / `RELEASE`.
        rollback: rusqlite::Error,
        /// The unit's own failure.
        cause: Box<Error>,
    },

    // =========================================================================
    // Constraint Violations
    // =========================================================================
    /// A streak log for this user and day already exists.
    ///
    /// The tracker checks for an existing log before inserting, so this only
    /// surfaces when a concurrent writer slipped in between the check and the
    /// insert. The `UNIQUE(user_id, streak_date)` constraint is the backstop.
    #[error("streak log for user {user_id} on {date} already exists")]
    StreakConflict {
        /// The user whose streak log collided.
        user_id: UserId,
        /// The calendar day that was already logged.
        date: NaiveDate,
    },

    // =========================================================================
    // Programming Errors (fail fast)
    // =========================================================================
    /// An `event_name` read from storage is not one of the known award types.
    #[error("unknown xp event name '{0}'")]
    UnknownEventName(String),

    /// Handlers kept raising events past the configured pass limit.
    ///
    /// This means two handlers feed each other in a cycle.
    #[error("domain event dispatch did not settle after {passes} passes")]
    DispatchDepthExceeded {
        /// Number of passes executed before giving up.
        passes: usize,
    },

    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// Leaderboard paging parameters out of range.
    #[error("invalid page request: page {page}, page size {page_size}")]
    InvalidPage {
        /// Requested page (1-based).
        page: u32,
        /// Requested rows per page.
        page_size: u32,
    },

    /// An XP amount could not be parsed as a two-decimal fixed-point value.
    #[error("invalid xp amount: {0}")]
    InvalidXp(String),

    /// Environment configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Cancellation
    // =========================================================================
    /// The request was cancelled before its unit of work committed.
    #[error("operation cancelled before commit")]
    Cancelled,
}

impl Error {
    /// Returns true if this error is a UNIQUE/PRIMARY KEY constraint violation.
    ///
    /// Used to tell "another writer won" apart from genuine storage failures.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Error::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
