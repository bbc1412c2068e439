//! # Synchronous Store
//!
//! [`XpStore`] is the in-process interface collaborators call: it owns one
//! SQLite connection and an [`XpEngine`], and exposes every operation as a
//! blocking call.
//!
//! ```text
//! endpoint handler
//!      │ submit(trigger, cancel)
//!      ▼
//! ┌───────────────────────────┐
//! │ XpStore                   │
//! │  SAVEPOINT xp_unit_N      │ ← one unit of work per call
//! │    dispatch passes        │
//! │  RELEASE / ROLLBACK TO    │
//! └───────────────────────────┘
//!      │
//!      ▼
//!   SQLite (WAL)
//! ```
//!
//! Each call is its own transaction. For group commit across many concurrent
//! callers, use the async [`SigmaXp`](crate::SigmaXp) handle instead.
//!
//! ## Thread Safety
//!
//! `XpStore` is not `Sync`. Writes take `&mut self`, reads take `&self`. Share
//! it across threads behind a mutex, or use one store per thread (SQLite's
//! locking keeps separate connections consistent).

use std::path::Path;

use chrono::NaiveDate;
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;

use crate::accrual::Award;
use crate::clock::{user_today, SharedClock};
use crate::config::XpConfig;
use crate::error::Result;
use crate::events::Trigger;
use crate::leaderboard::{self, LeaderboardPage, PageRequest};
use crate::schema::Database;
use crate::streak::{self, StreakSummary};
use crate::types::{UserId, Xp, XpEvent, XpSnapshot};
use crate::uow::{UnitOutcome, UnitRequest, XpEngine};
use crate::{ledger, recommendations, snapshot};

/// Blocking XP ledger over one connection.
pub struct XpStore {
    conn: Connection,
    engine: XpEngine,
    /// Monotonic counter for savepoint names.
    unit_seq: u64,
}

impl XpStore {
    /// Opens (creating if needed) a database file.
    pub fn open(path: impl AsRef<Path>, config: XpConfig, clock: SharedClock) -> Result<Self> {
        let db = Database::open(path)?;
        Ok(Self::new(db.into_connection(), XpEngine::new(config, clock)?))
    }

    /// Opens a fresh in-memory database.
    pub fn open_in_memory(config: XpConfig, clock: SharedClock) -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::new(db.into_connection(), XpEngine::new(config, clock)?))
    }

    /// Wraps an initialized connection.
    pub fn new(conn: Connection, engine: XpEngine) -> Self {
        Self {
            conn,
            engine,
            unit_seq: 0,
        }
    }

    /// The accrual engine.
    pub fn engine(&self) -> &XpEngine {
        &self.engine
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Runs a trigger and all its effects as one unit of work.
    pub fn submit(&mut self, trigger: Trigger, cancel: &CancellationToken) -> Result<UnitOutcome> {
        self.execute(UnitRequest::Trigger(trigger), cancel)
    }

    /// Appends an award directly, then compacts like any other award.
    pub fn append_award(
        &mut self,
        user_id: UserId,
        award: Award,
        cancel: &CancellationToken,
    ) -> Result<UnitOutcome> {
        self.execute(UnitRequest::Award { user_id, award }, cancel)
    }

    fn execute(&mut self, request: UnitRequest, cancel: &CancellationToken) -> Result<UnitOutcome> {
        self.unit_seq += 1;
        let savepoint = format!("xp_unit_{}", self.unit_seq);
        self.engine.execute(&self.conn, &savepoint, request, cancel)
    }

    /// Adds or updates a recommendation catalogue entry.
    pub fn upsert_recommendation(&mut self, isbn: &str, exp: Xp) -> Result<()> {
        recommendations::upsert_recommendation(&self.conn, isbn, exp)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Accumulated XP truncated to whole points.
    pub fn accumulated_exp(&self, user_id: UserId) -> Result<i64> {
        snapshot::accumulated_exp(&self.conn, user_id)
    }

    /// Exact accumulated XP.
    pub fn accumulated_xp(&self, user_id: UserId) -> Result<Xp> {
        snapshot::accumulated_xp(&self.conn, user_id)
    }

    /// The user's latest snapshot.
    pub fn latest_snapshot(&self, user_id: UserId) -> Result<Option<XpSnapshot>> {
        snapshot::latest(&self.conn, user_id)
    }

    /// All of a user's XP events, oldest first.
    pub fn user_events(&self, user_id: UserId) -> Result<Vec<XpEvent>> {
        ledger::events_for_user(&self.conn, user_id)
    }

    /// All of a user's snapshots in sequence order.
    pub fn user_snapshots(&self, user_id: UserId) -> Result<Vec<XpSnapshot>> {
        snapshot::snapshots_for_user(&self.conn, user_id)
    }

    /// One page of the ranking.
    pub fn leaderboard(&self, request: PageRequest) -> Result<LeaderboardPage> {
        leaderboard::query_leaderboard(&self.conn, request)
    }

    /// The user's streak profile as of the clock's today.
    pub fn streak_summary(&self, user_id: UserId) -> Result<StreakSummary> {
        streak::streak_summary(&self.conn, user_id, self.today())
    }

    /// Today in the users' calendar.
    pub fn today(&self) -> NaiveDate {
        user_today(self.engine.clock().as_ref(), self.engine.offset())
    }
}
