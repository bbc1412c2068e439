//! # Event Log
//!
//! The append-only XP ledger. Every award is one row in `xp_events`; nothing
//! here updates or deletes.
//!
//! ## Operations
//!
//! | Function | Purpose |
//! |----------|---------|
//! | [`append`] | Insert one award, return it with its assigned id |
//! | [`sum_range`] / [`sum_after`] | Total of a user's events in `(from, to]` / `(from, ∞)` |
//! | [`count_range`] | Unsnapshotted event count for compaction |
//! | [`exists`] | Idempotency guard on `(user, event type, ref)` |
//! | [`last_of_type`] | Most recent award of a type (cooldown guard) |
//! | [`events_for_user`] | Full audit trail |
//!
//! ## Rust Pattern: Free Functions Over `&Connection`
//!
//! These take a plain `&Connection` rather than a wrapper type, so the same
//! code runs against the writer's connection inside a savepoint and against a
//! reader thread's read-only connection.
//!
//! ## Failure Semantics
//!
//! Storage errors propagate unchanged. There are no retries here; the caller's
//! unit of work rolls back.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::types::{EventId, ExpEventType, RefId, UserId, Xp, XpEvent};

const SELECT_EVENT_COLUMNS: &str =
    "SELECT id, user_id, exp, event_name, ref_id, created_at FROM xp_events";

// =============================================================================
// Writes
// =============================================================================

/// Appends one award and returns it with its store-assigned id.
///
/// A single INSERT; the id comes from `AUTOINCREMENT` and is never reused.
pub fn append(
    conn: &Connection,
    user_id: UserId,
    amount: Xp,
    event_type: ExpEventType,
    ref_id: RefId,
    created_at: DateTime<Utc>,
) -> Result<XpEvent> {
    conn.execute(
        "INSERT INTO xp_events (user_id, exp, event_name, ref_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user_id.as_raw(),
            amount.as_hundredths(),
            event_type.as_str(),
            ref_id.as_raw(),
            created_at.timestamp_millis(),
        ],
    )?;

    let id = conn.last_insert_rowid();

    Ok(XpEvent {
        id: EventId::from_raw(id as u64),
        user_id,
        amount,
        event_type,
        ref_id,
        created_at,
    })
}

// =============================================================================
// Aggregates
// =============================================================================

/// Sums a user's events with `from_exclusive < id <= to_inclusive`.
///
/// This is the fold used when a snapshot is taken.
pub fn sum_range(
    conn: &Connection,
    user_id: UserId,
    from_exclusive: EventId,
    to_inclusive: EventId,
) -> Result<Xp> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(exp), 0) FROM xp_events
         WHERE user_id = ?1 AND id > ?2 AND id <= ?3",
        params![user_id.as_raw(), from_exclusive.as_sql(), to_inclusive.as_sql()],
        |row| row.get(0),
    )?;
    Ok(Xp::from_hundredths(total))
}

/// Sums every event of a user with `id > from_exclusive`.
pub fn sum_after(conn: &Connection, user_id: UserId, from_exclusive: EventId) -> Result<Xp> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(exp), 0) FROM xp_events WHERE user_id = ?1 AND id > ?2",
        params![user_id.as_raw(), from_exclusive.as_sql()],
        |row| row.get(0),
    )?;
    Ok(Xp::from_hundredths(total))
}

/// Counts a user's events with `from_exclusive < id <= to_inclusive`.
pub fn count_range(
    conn: &Connection,
    user_id: UserId,
    from_exclusive: EventId,
    to_inclusive: EventId,
) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM xp_events WHERE user_id = ?1 AND id > ?2 AND id <= ?3",
        params![user_id.as_raw(), from_exclusive.as_sql(), to_inclusive.as_sql()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

// =============================================================================
// Guard Queries
// =============================================================================

/// Returns true if the idempotency key `(user_id, event_type, ref_id)` has
/// already been awarded.
pub fn exists(
    conn: &Connection,
    user_id: UserId,
    event_type: ExpEventType,
    ref_id: RefId,
) -> Result<bool> {
    let found: bool = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM xp_events WHERE user_id = ?1 AND event_name = ?2 AND ref_id = ?3
         )",
        params![user_id.as_raw(), event_type.as_str(), ref_id.as_raw()],
        |row| row.get(0),
    )?;
    Ok(found)
}

/// Returns the user's most recent award of `event_type`, if any.
pub fn last_of_type(
    conn: &Connection,
    user_id: UserId,
    event_type: ExpEventType,
) -> Result<Option<XpEvent>> {
    let sql = format!(
        "{SELECT_EVENT_COLUMNS} WHERE user_id = ?1 AND event_name = ?2 ORDER BY id DESC LIMIT 1"
    );
    let raw = conn
        .query_row(&sql, params![user_id.as_raw(), event_type.as_str()], RawEvent::from_row)
        .optional()?;
    raw.map(RawEvent::into_event).transpose()
}

// =============================================================================
// Listing
// =============================================================================

/// Returns every award of a user, oldest first.
pub fn events_for_user(conn: &Connection, user_id: UserId) -> Result<Vec<XpEvent>> {
    let sql = format!("{SELECT_EVENT_COLUMNS} WHERE user_id = ?1 ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([user_id.as_raw()], RawEvent::from_row)?;

    let mut events = Vec::new();
    for raw in rows {
        events.push(raw?.into_event()?);
    }
    Ok(events)
}

// =============================================================================
// Row Mapping
// =============================================================================

/// A row as SQLite returns it, before the event name is interpreted.
///
/// `query_map` closures can only fail with `rusqlite::Error`; decoding into
/// domain types happens afterwards so an unknown name surfaces as
/// [`Error::UnknownEventName`].
struct RawEvent {
    id: i64,
    user_id: i64,
    exp: i64,
    event_name: String,
    ref_id: i64,
    created_at: i64,
}

impl RawEvent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            exp: row.get(2)?,
            event_name: row.get(3)?,
            ref_id: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_event(self) -> Result<XpEvent> {
        let created_at = DateTime::from_timestamp_millis(self.created_at).ok_or_else(|| {
            Error::Schema(format!(
                "xp event {} has out-of-range created_at {}",
                self.id, self.created_at
            ))
        })?;

        Ok(XpEvent {
            id: EventId::from_raw(self.id as u64),
            user_id: UserId::new(self.user_id),
            amount: Xp::from_hundredths(self.exp),
            event_type: self.event_name.parse()?,
            ref_id: RefId::new(self.ref_id),
            created_at,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
