//! # Streak Tracker
//!
//! Derives consecutive-day streaks from `streak_logs`, one row per user per
//! qualifying calendar day.
//!
//! ## State Machine
//!
//! ```text
//!             qualifying day D          next day D+1        gap (D+2 skipped)
//! NoStreak ─────────────────► Day1 ───────────────► Day2 ─ … ──────────────► Day1
//! ```
//!
//! The streak length is never stored. It is recomputed from the log on
//! demand by walking dates downward with an "expected date" cursor, so there
//! is no second piece of state that could drift from the log.
//!
//! ## Two Walks
//!
//! - [`consecutive_days_ending`]: the milestone walk. Starts *at* a given day
//!   (the new log's date). Used by the StreakExp rule.
//! - [`current_streak`]: the profile walk. Counts today if logged, then walks
//!   back from yesterday, so a streak that ended yesterday is still alive
//!   while today is not over.

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::snapshot;
use crate::types::{StreakLog, UserId};

/// One day of the weekly strip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayStatus {
    /// Calendar date.
    pub date: NaiveDate,
    /// `Some(logged?)` for days up to today, `None` for future days.
    pub has_streak: Option<bool>,
}

/// A user's streak profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreakSummary {
    /// See [`current_streak`].
    pub current_streak_days: u32,
    /// Accumulated XP, truncated.
    pub total_exp: i64,
    /// Monday to Sunday of the week containing today.
    pub weekly_status: Vec<DayStatus>,
}

// =============================================================================
// Writes
// =============================================================================

/// Records `date` as a qualifying day for the user.
///
/// Returns the new log, or `None` if the day was already logged; at most one
/// log exists per user per day however many qualifying actions occur.
///
/// # Errors
///
/// [`Error::StreakConflict`] if another writer inserted the same day between
/// the existence check and the insert.
pub fn record_qualifying_day(
    conn: &Connection,
    user_id: UserId,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Option<StreakLog>> {
    if has_log_on(conn, user_id, date)? {
        debug!(%user_id, %date, "streak day already logged");
        return Ok(None);
    }

    let inserted = conn.execute(
        "INSERT INTO streak_logs (user_id, streak_date, created_at) VALUES (?1, ?2, ?3)",
        params![user_id.as_raw(), date, now.timestamp_millis()],
    );

    match inserted {
        Ok(_) => Ok(Some(StreakLog {
            id: conn.last_insert_rowid(),
            user_id,
            streak_date: date,
        })),
        Err(e) => {
            let err = Error::from(e);
            if err.is_constraint_violation() {
                Err(Error::StreakConflict { user_id, date })
            } else {
                Err(err)
            }
        }
    }
}

// =============================================================================
// Reads
// =============================================================================

/// Returns true if the user has a log for `date`.
pub fn has_log_on(conn: &Connection, user_id: UserId, date: NaiveDate) -> Result<bool> {
    let found: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM streak_logs WHERE user_id = ?1 AND streak_date = ?2)",
        params![user_id.as_raw(), date],
        |row| row.get(0),
    )?;
    Ok(found)
}

/// Returns the user's logged dates on or before `until`, newest first.
pub fn dates_until(conn: &Connection, user_id: UserId, until: NaiveDate) -> Result<Vec<NaiveDate>> {
    let mut stmt = conn.prepare(
        "SELECT streak_date FROM streak_logs
         WHERE user_id = ?1 AND streak_date <= ?2
         ORDER BY streak_date DESC",
    )?;
    let dates = stmt
        .query_map(params![user_id.as_raw(), until], |row| row.get(0))?
        .collect::<std::result::Result<Vec<NaiveDate>, _>>()?;
    Ok(dates)
}

/// Returns the user's logs in `[from, to]`, oldest first.
pub fn logs_between(
    conn: &Connection,
    user_id: UserId,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<StreakLog>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, streak_date FROM streak_logs
         WHERE user_id = ?1 AND streak_date >= ?2 AND streak_date <= ?3
         ORDER BY streak_date",
    )?;
    let logs = stmt
        .query_map(params![user_id.as_raw(), from, to], |row| {
            Ok(StreakLog {
                id: row.get(0)?,
                user_id: UserId::new(row.get(1)?),
                streak_date: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(logs)
}

/// Length of the run of consecutive logged days ending at `end`.
///
/// Zero if `end` itself is not logged.
pub fn consecutive_days_ending(conn: &Connection, user_id: UserId, end: NaiveDate) -> Result<u32> {
    let dates = dates_until(conn, user_id, end)?;
    Ok(count_run(&dates, end))
}

/// The user's live streak as of `today`.
pub fn current_streak(conn: &Connection, user_id: UserId, today: NaiveDate) -> Result<u32> {
    let dates = dates_until(conn, user_id, today)?;

    let (logged_today, earlier) = match dates.split_first() {
        Some((first, rest)) if *first == today => (1, rest),
        _ => (0, dates.as_slice()),
    };

    Ok(logged_today + count_run(earlier, today - TimeDelta::days(1)))
}

/// Monday..Sunday of the week containing `today`.
pub fn weekly_status(conn: &Connection, user_id: UserId, today: NaiveDate) -> Result<Vec<DayStatus>> {
    let monday = today - TimeDelta::days(i64::from(today.weekday().num_days_from_monday()));
    let sunday = monday + TimeDelta::days(6);
    let logged: Vec<NaiveDate> = logs_between(conn, user_id, monday, sunday)?
        .into_iter()
        .map(|log| log.streak_date)
        .collect();

    Ok(monday
        .iter_days()
        .take(7)
        .map(|date| DayStatus {
            date,
            has_streak: (date <= today).then(|| logged.contains(&date)),
        })
        .collect())
}

/// Builds the streak profile shown to a user.
pub fn streak_summary(conn: &Connection, user_id: UserId, today: NaiveDate) -> Result<StreakSummary> {
    Ok(StreakSummary {
        current_streak_days: current_streak(conn, user_id, today)?,
        total_exp: snapshot::accumulated_exp(conn, user_id)?,
        weekly_status: weekly_status(conn, user_id, today)?,
    })
}

/// Counts the run of dates `end, end-1, end-2, …` at the head of
/// `dates_desc`, stopping at the first gap.
fn count_run(dates_desc: &[NaiveDate], end: NaiveDate) -> u32 {
    let mut expected = end;
    let mut run = 0;
    for date in dates_desc {
        if *date != expected {
            break;
        }
        run += 1;
        expected -= TimeDelta::days(1);
    }
    run
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::schema::Database;

    fn day(d: u32) -> NaiveDate {
        // 2026-03-02 is a Monday.
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    fn log_days(conn: &Connection, user: UserId, days: &[u32]) {
        for d in days {
            record_qualifying_day(conn, user, day(*d), now()).unwrap();
        }
    }

    #[test]
    fn test_record_is_idempotent_per_day() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let user = UserId::new(1);

        let first = record_qualifying_day(conn, user, day(5), now()).unwrap();
        assert!(first.is_some());
        assert!(record_qualifying_day(conn, user, day(5), now()).unwrap().is_none());
        assert!(record_qualifying_day(conn, UserId::new(2), day(5), now())
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_bypassed_check_surfaces_conflict() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let user = UserId::new(1);

        // Another writer's row becomes visible only at insert time.
        conn.execute_batch(
            "CREATE TEMP TRIGGER competing_writer BEFORE INSERT ON streak_logs
             WHEN NEW.created_at <> 0
             BEGIN
                 INSERT INTO streak_logs (user_id, streak_date, created_at)
                 VALUES (NEW.user_id, NEW.streak_date, 0);
             END;",
        )
        .unwrap();

        let err = record_qualifying_day(conn, user, day(5), now()).unwrap_err();
        assert!(matches!(
            err,
            Error::StreakConflict { user_id, date } if user_id == user && date == day(5)
        ));
    }

    #[test]
    fn test_contiguity_and_reset() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let user = UserId::new(1);

        log_days(conn, user, &[2, 3, 4, 5]);
        assert_eq!(consecutive_days_ending(conn, user, day(5)).unwrap(), 4);
        assert_eq!(consecutive_days_ending(conn, user, day(4)).unwrap(), 3);

        log_days(conn, user, &[7]);
        assert_eq!(consecutive_days_ending(conn, user, day(7)).unwrap(), 1);
        assert_eq!(consecutive_days_ending(conn, user, day(6)).unwrap(), 0);
    }

    #[test]
    fn test_current_streak_keeps_yesterday_alive() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let user = UserId::new(1);

        log_days(conn, user, &[2, 3, 4]);
        assert_eq!(current_streak(conn, user, day(5)).unwrap(), 3, "today not yet logged");
        assert_eq!(current_streak(conn, user, day(4)).unwrap(), 3);
        assert_eq!(current_streak(conn, user, day(6)).unwrap(), 0, "yesterday missed");

        log_days(conn, user, &[5]);
        assert_eq!(current_streak(conn, user, day(5)).unwrap(), 4);
    }

    #[test]
    fn test_weekly_status_marks_future_days() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let user = UserId::new(1);

        log_days(conn, user, &[1, 2, 4]);
        let week = weekly_status(conn, user, day(5)).unwrap();

        assert_eq!(week.len(), 7);
        assert_eq!(week[0].date, day(2));
        assert_eq!(week[6].date, day(8));
        let flags: Vec<Option<bool>> = week.iter().map(|d| d.has_streak).collect();
        assert_eq!(
            flags,
            vec![Some(true), Some(false), Some(true), Some(false), None, None, None]
        );
    }

    #[test]
    fn test_summary_includes_total_exp() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let user = UserId::new(1);
        conn.execute(
            "INSERT INTO xp_events (user_id, exp, event_name, ref_id, created_at)
             VALUES (1, 1299, 'ReadingExp', 1, 0)",
            [],
        )
        .unwrap();
        log_days(conn, user, &[5]);

        let summary = streak_summary(conn, user, day(5)).unwrap();
        assert_eq!(summary.current_streak_days, 1);
        assert_eq!(summary.total_exp, 12);
        assert_eq!(summary.weekly_status.len(), 7);
    }
}
