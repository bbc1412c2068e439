//! # SQLite Schema for sigma-xp
//!
//! This module defines the database schema and handles initialization.
//!
//! ## Table Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Schema Overview                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  xp_events                       xp_snapshots                           │
//! │  ┌──────────────────┐            ┌──────────────────────┐               │
//! │  │ id (PK, AUTOINC) │◄───────────│ last_event_id        │               │
//! │  │ user_id          │            │ user_id              │               │
//! │  │ exp (hundredths) │            │ snapshot_seq         │               │
//! │  │ event_name       │            │ exp (hundredths)     │               │
//! │  │ ref_id           │            │ UNIQUE(user, seq)    │               │
//! │  │ created_at (ms)  │            └──────────────────────┘               │
//! │  └──────────────────┘                                                   │
//! │           ▲                                                             │
//! │           │ ref_id (StreakExp)                                          │
//! │  streak_logs                     reading_recommendations                │
//! │  ┌──────────────────────┐        ┌──────────────────┐                   │
//! │  │ id (PK)              │        │ isbn (PK)        │                   │
//! │  │ user_id              │        │ exp (hundredths) │                   │
//! │  │ streak_date          │        └──────────────────┘                   │
//! │  │ UNIQUE(user, date)   │                                               │
//! │  └──────────────────────┘        xp_leaderboard (VIEW)                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Decisions
//!
//! ### Why INTEGER hundredths for `exp`?
//!
//! SQLite has no decimal type. `REAL` would reintroduce the rounding drift the
//! [`Xp`](crate::types::Xp) type exists to avoid, so both `exp` columns hold an
//! exact count of hundredths and `SUM()` stays exact.
//!
//! ### Why `AUTOINCREMENT` on `xp_events`?
//!
//! A plain `INTEGER PRIMARY KEY` may reuse the highest id after a delete. Events
//! are never deleted, but snapshots record `last_event_id` and the ledger
//! promises ids are never reused, so we pay for the stronger guarantee.
//!
//! ### The Uniqueness Backstops
//!
//! `UNIQUE(user_id, snapshot_seq)` turns a compaction race into a constraint
//! violation the loser can discard. `UNIQUE(user_id, streak_date)` keeps "one
//! streak log per day" true even if the existence check is bypassed.

use std::path::Path;

use rusqlite::{Connection, OpenFlags};

use crate::{Error, Result};

// =============================================================================
// Schema Version
// =============================================================================

/// Current schema version. Increment when making breaking schema changes.
///
/// There are no migrations: a database with a different version is refused.
const SCHEMA_VERSION: i32 = 1;

// =============================================================================
// DDL Statements
// =============================================================================

/// The append-only XP ledger.
///
/// # Columns
///
/// - `id`: Ledger position, assigned on insert, never reused
/// - `user_id`: Subject of the award
/// - `exp`: Amount in hundredths of a point
/// - `event_name`: One of the `ExpEventType` names
/// - `ref_id`: Soft reference to the triggering action
/// - `created_at`: Unix timestamp in milliseconds
const CREATE_XP_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS xp_events (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id    INTEGER NOT NULL,
    exp        INTEGER NOT NULL,
    event_name TEXT    NOT NULL,
    ref_id     INTEGER NOT NULL,
    created_at INTEGER NOT NULL
)
"#;

/// Supports "events for user after id X" (snapshot folds, accumulated XP).
const CREATE_XP_EVENTS_USER_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS xp_events_user_id
ON xp_events(user_id, id)
"#;

/// Supports the idempotency guard lookup on `(user_id, event_name, ref_id)`.
const CREATE_XP_EVENTS_KEY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS xp_events_idempotency
ON xp_events(user_id, event_name, ref_id)
"#;

/// Periodic checkpoints of a user's running total.
///
/// Rows are never updated. The latest snapshot of a user is the one with the
/// highest `snapshot_seq`.
const CREATE_XP_SNAPSHOTS: &str = r#"
CREATE TABLE IF NOT EXISTS xp_snapshots (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id       INTEGER NOT NULL,
    snapshot_seq  INTEGER NOT NULL,
    last_event_id INTEGER NOT NULL,
    exp           INTEGER NOT NULL,
    created_at    INTEGER NOT NULL,
    UNIQUE (user_id, snapshot_seq)
)
"#;

/// One row per user per qualifying calendar day.
///
/// `streak_date` is an ISO-8601 date (`YYYY-MM-DD`), so lexical order is
/// chronological order.
const CREATE_STREAK_LOGS: &str = r#"
CREATE TABLE IF NOT EXISTS streak_logs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL,
    streak_date TEXT    NOT NULL,
    created_at  INTEGER NOT NULL,
    UNIQUE (user_id, streak_date)
)
"#;

/// Catalogue of recommended books, keyed by ISBN.
///
/// Owned by an external collaborator; the completion rule only reads it.
const CREATE_READING_RECOMMENDATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS reading_recommendations (
    isbn TEXT    PRIMARY KEY,
    exp  INTEGER NOT NULL
)
"#;

/// Accumulated XP per user: latest snapshot plus the unsnapshotted tail.
///
/// # Same Formula As `accumulated_exp`
///
/// The tail is `id > last_event_id` (strictly greater), with a zero baseline
/// for users without a snapshot. Only users with at least one event appear.
/// The total is exact hundredths; truncation is left to the reader.
const CREATE_XP_LEADERBOARD_VIEW: &str = r#"
CREATE VIEW IF NOT EXISTS xp_leaderboard AS
WITH latest AS (
    SELECT s.user_id, s.last_event_id, s.exp
    FROM xp_snapshots s
    WHERE s.snapshot_seq = (
        SELECT MAX(snapshot_seq) FROM xp_snapshots WHERE user_id = s.user_id
    )
)
SELECT u.user_id AS user_id,
       COALESCE(l.exp, 0) + COALESCE((
           SELECT SUM(e.exp) FROM xp_events e
           WHERE e.user_id = u.user_id AND e.id > COALESCE(l.last_event_id, 0)
       ), 0) AS exp
FROM (SELECT DISTINCT user_id FROM xp_events) u
LEFT JOIN latest l ON l.user_id = u.user_id
"#;

/// Metadata table for schema versioning.
const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS sigma_xp_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

// =============================================================================
// Database Wrapper
// =============================================================================

/// A SQLite connection with the sigma-xp schema applied.
///
/// # Rust Pattern: Newtype Wrapper
///
/// Holding a `Database` proves the tables exist and the schema version was
/// checked. [`Database::into_connection`] hands the raw connection to the
/// storage layer once initialization is done.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database file, creating and initializing it if necessary.
    ///
    /// # Errors
    ///
    /// - `Error::Sqlite` if the file can't be opened or created
    /// - `Error::Schema` if the schema version doesn't match
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use sigma_xp::Database;
    ///
    /// let db = Database::open("xp.db")?;
    /// # Ok::<(), sigma_xp::Error>(())
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Creates an in-memory database, used by unit tests.
    ///
    /// ```rust
    /// use sigma_xp::Database;
    ///
    /// let db = Database::open_in_memory()?;
    /// # Ok::<(), sigma_xp::Error>(())
    /// ```
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Creates tables, sets pragmas and checks the schema version.
    fn initialize(&mut self) -> Result<()> {
        // WAL: readers see a consistent snapshot while the writer commits.
        self.conn.execute_batch("PRAGMA journal_mode = WAL")?;
        self.conn.execute_batch("PRAGMA synchronous = NORMAL")?;

        self.conn.execute_batch(CREATE_METADATA)?;
        self.conn.execute_batch(CREATE_XP_EVENTS)?;
        self.conn.execute_batch(CREATE_XP_EVENTS_USER_INDEX)?;
        self.conn.execute_batch(CREATE_XP_EVENTS_KEY_INDEX)?;
        self.conn.execute_batch(CREATE_XP_SNAPSHOTS)?;
        self.conn.execute_batch(CREATE_STREAK_LOGS)?;
        self.conn.execute_batch(CREATE_READING_RECOMMENDATIONS)?;
        self.conn.execute_batch(CREATE_XP_LEADERBOARD_VIEW)?;

        self.verify_or_set_version()
    }

    /// Verifies the schema version, or sets it if this is a new database.
    fn verify_or_set_version(&mut self) -> Result<()> {
        let existing: Option<String> = match self.conn.query_row(
            "SELECT value FROM sigma_xp_metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        ) {
            Ok(v) => Some(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        match existing {
            None => {
                self.conn.execute(
                    "INSERT INTO sigma_xp_metadata (key, value) VALUES ('schema_version', ?)",
                    [SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(v) if v == SCHEMA_VERSION.to_string() => {}
            Some(v) => {
                return Err(Error::Schema(format!(
                    "schema version mismatch: database has version {v}, this build requires {SCHEMA_VERSION}"
                )));
            }
        }

        Ok(())
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Consumes the wrapper and returns the initialized connection.
    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

/// Opens a read-only connection to an already initialized database file.
///
/// Used by reader threads. The file must have been created by
/// [`Database::open`] first; no schema is created here.
pub fn open_read_only(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(conn)
}

// =============================================================================
// Tests
// =============================================================================
