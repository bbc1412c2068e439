//! # Snapshot Store
//!
//! Periodic compaction of the event log into per-user running totals.
//!
//! ## The Compaction Rule
//!
//! After every append, [`maybe_compact`] counts the user's events after the
//! latest snapshot. Once that count reaches the configured interval, a new
//! snapshot folds them in:
//!
//! ```text
//! events:    e1 e2 e3 e4 e5 e6 e7 │ e8 … e14 │ e15
//!                                 ▲          ▲
//! snapshots:             seq 1 (last=e7)  seq 2 (last=e14)
//!
//! accumulated = latest.exp + Σ exp(e) for e.id > latest.last_event_id
//! ```
//!
//! Reading a total therefore costs one snapshot row plus fewer than
//! `interval` event rows, however long the user's history is.
//!
//! ## Concurrency
//!
//! Two writers may both cross the threshold for one user. The
//! `UNIQUE(user_id, snapshot_seq)` constraint makes the second insert fail;
//! that writer logs a warning and carries on. The event log stays
//! authoritative, so a lost compaction loses nothing.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{info, warn};

use crate::error::Result;
use crate::ledger;
use crate::types::{EventId, SnapshotSeq, UserId, Xp, XpSnapshot};

const SELECT_SNAPSHOT_COLUMNS: &str =
    "SELECT id, user_id, snapshot_seq, last_event_id, exp FROM xp_snapshots";

/// What [`maybe_compact`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactOutcome {
    /// Fewer than `interval` events are pending; nothing was written.
    BelowThreshold {
        /// Events after the latest snapshot, the new one included.
        pending: u64,
    },
    /// A new snapshot was inserted.
    Created(XpSnapshot),
    /// Another writer inserted this sequence number first.
    LostRace {
        /// The sequence number we tried to take.
        snapshot_seq: SnapshotSeq,
    },
}

/// Returns the user's snapshot with the highest sequence number.
pub fn latest(conn: &Connection, user_id: UserId) -> Result<Option<XpSnapshot>> {
    let sql = format!(
        "{SELECT_SNAPSHOT_COLUMNS} WHERE user_id = ?1 ORDER BY snapshot_seq DESC LIMIT 1"
    );
    let snapshot = conn
        .query_row(&sql, [user_id.as_raw()], snapshot_from_row)
        .optional()?;
    Ok(snapshot)
}

/// Takes a snapshot if the user has `interval` or more unsnapshotted events up
/// to and including `just_appended`.
///
/// `just_appended` becomes the new snapshot's `last_event_id`. Both the count
/// and the fold cover `(previous.last_event_id, just_appended]`, so an event
/// appended later in the same unit of work is neither counted nor folded
/// here; its own `UserExpCreated` pass handles it.
pub fn maybe_compact(
    conn: &Connection,
    user_id: UserId,
    just_appended: EventId,
    interval: u32,
    now: DateTime<Utc>,
) -> Result<CompactOutcome> {
    let previous = latest(conn, user_id)?;
    let (prev_seq, prev_last, prev_exp) = match &previous {
        Some(s) => (s.snapshot_seq, s.last_event_id, s.exp),
        None => (SnapshotSeq::NONE, EventId::BEFORE_FIRST, Xp::ZERO),
    };

    let pending = ledger::count_range(conn, user_id, prev_last, just_appended)?;
    if pending < u64::from(interval) {
        return Ok(CompactOutcome::BelowThreshold { pending });
    }

    let folded = ledger::sum_range(conn, user_id, prev_last, just_appended)?;
    let snapshot_seq = prev_seq.next();
    let exp = prev_exp + folded;

    let inserted = conn.execute(
        "INSERT INTO xp_snapshots (user_id, snapshot_seq, last_event_id, exp, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user_id.as_raw(),
            snapshot_seq.as_raw() as i64,
            just_appended.as_sql(),
            exp.as_hundredths(),
            now.timestamp_millis(),
        ],
    );

    match inserted {
        Ok(_) => {
            let snapshot = XpSnapshot {
                id: conn.last_insert_rowid(),
                user_id,
                snapshot_seq,
                last_event_id: just_appended,
                exp,
            };
            info!(
                %user_id,
                snapshot_seq = %snapshot_seq,
                last_event_id = %just_appended,
                exp = %exp,
                "snapshot created"
            );
            Ok(CompactOutcome::Created(snapshot))
        }
        Err(e) => {
            let err = crate::Error::from(e);
            if err.is_constraint_violation() {
                warn!(%user_id, snapshot_seq = %snapshot_seq, "snapshot already taken by another writer");
                Ok(CompactOutcome::LostRace { snapshot_seq })
            } else {
                Err(err)
            }
        }
    }
}

/// Exact accumulated XP: latest snapshot (or zero) plus every later event.
pub fn accumulated_xp(conn: &Connection, user_id: UserId) -> Result<Xp> {
    let (base_last, base_exp) = match latest(conn, user_id)? {
        Some(s) => (s.last_event_id, s.exp),
        None => (EventId::BEFORE_FIRST, Xp::ZERO),
    };
    Ok(base_exp + ledger::sum_after(conn, user_id, base_last)?)
}

/// Accumulated XP truncated to whole points.
///
/// The only place XP loses precision.
pub fn accumulated_exp(conn: &Connection, user_id: UserId) -> Result<i64> {
    Ok(accumulated_xp(conn, user_id)?.truncate())
}

/// Returns every snapshot of a user in sequence order.
pub fn snapshots_for_user(conn: &Connection, user_id: UserId) -> Result<Vec<XpSnapshot>> {
    let sql = format!("{SELECT_SNAPSHOT_COLUMNS} WHERE user_id = ?1 ORDER BY snapshot_seq");
    let mut stmt = conn.prepare(&sql)?;
    let snapshots = stmt
        .query_map([user_id.as_raw()], snapshot_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(snapshots)
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<XpSnapshot> {
    Ok(XpSnapshot {
        id: row.get(0)?,
        user_id: UserId::new(row.get(1)?),
        snapshot_seq: SnapshotSeq::from_raw(row.get::<_, i64>(2)? as u64),
        last_event_id: EventId::from_raw(row.get::<_, i64>(3)? as u64),
        exp: Xp::from_hundredths(row.get(4)?),
    })
}
