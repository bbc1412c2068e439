//! # Reader Pool
//!
//! Read queries run on dedicated threads, each with its own read-only
//! connection, so a long leaderboard scan never delays the writer.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Reader Pool                     │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐              │
//! │  │Reader 1 │  │Reader 2 │  │Reader N │              │
//! │  └────┬────┘  └────┬────┘  └────┬────┘              │
//! │       └────────────┴────────────┘                   │
//! │          read-only connections (WAL)                │
//! └─────────────────────────┬───────────────────────────┘
//!                           ▼
//!                     SQLite (WAL)
//! ```
//!
//! WAL mode lets every reader see the latest committed batch without
//! blocking the writer. In-memory databases have no file to reopen, so the
//! writer thread answers their reads through the same [`serve`] function.

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::Result;
use crate::leaderboard::{self, LeaderboardPage, PageRequest};
use crate::streak::{self, StreakSummary};
use crate::types::{UserId, Xp, XpEvent, XpSnapshot};
use crate::{ledger, snapshot};

/// A read query with its response channel.
pub enum ReadRequest {
    /// Exact accumulated XP.
    AccumulatedXp {
        user_id: UserId,
        response: oneshot::Sender<Result<Xp>>,
    },

    /// The user's latest snapshot.
    LatestSnapshot {
        user_id: UserId,
        response: oneshot::Sender<Result<Option<XpSnapshot>>>,
    },

    /// All of a user's events, oldest first.
    UserEvents {
        user_id: UserId,
        response: oneshot::Sender<Result<Vec<XpEvent>>>,
    },

    /// All of a user's snapshots in sequence order.
    UserSnapshots {
        user_id: UserId,
        response: oneshot::Sender<Result<Vec<XpSnapshot>>>,
    },

    /// One leaderboard page.
    Leaderboard {
        request: PageRequest,
        response: oneshot::Sender<Result<LeaderboardPage>>,
    },

    /// Streak profile as of `today`.
    StreakSummary {
        user_id: UserId,
        today: NaiveDate,
        response: oneshot::Sender<Result<StreakSummary>>,
    },

    /// Stop the receiving reader thread.
    Shutdown,
}

/// Answers one request on `conn`.
///
/// Returns `false` for [`ReadRequest::Shutdown`].
pub fn serve(conn: &Connection, request: ReadRequest) -> bool {
    match request {
        ReadRequest::AccumulatedXp { user_id, response } => {
            let _ = response.send(snapshot::accumulated_xp(conn, user_id));
        }
        ReadRequest::LatestSnapshot { user_id, response } => {
            let _ = response.send(snapshot::latest(conn, user_id));
        }
        ReadRequest::UserEvents { user_id, response } => {
            let _ = response.send(ledger::events_for_user(conn, user_id));
        }
        ReadRequest::UserSnapshots { user_id, response } => {
            let _ = response.send(snapshot::snapshots_for_user(conn, user_id));
        }
        ReadRequest::Leaderboard { request, response } => {
            let _ = response.send(leaderboard::query_leaderboard(conn, request));
        }
        ReadRequest::StreakSummary {
            user_id,
            today,
            response,
        } => {
            let _ = response.send(streak::streak_summary(conn, user_id, today));
        }
        ReadRequest::Shutdown => return false,
    }
    true
}

/// Runs one pooled reader until shutdown or until the channel closes.
///
/// Threads compete for the shared receiver; whichever is free takes the
/// next request.
pub fn run_reader_pooled(conn: Connection, rx: Arc<Mutex<mpsc::Receiver<ReadRequest>>>) {
    loop {
        let request = match rx.lock() {
            Ok(mut guard) => guard.blocking_recv(),
            Err(_) => {
                warn!("reader receiver poisoned");
                None
            }
        };

        match request {
            Some(request) => {
                if !serve(&conn, request) {
                    break;
                }
            }
            None => break,
        }
    }
    debug!("reader stopped");
}

#[cfg(test)]
mod tests {
    use rusqlite::params;

    use super::*;
    use crate::schema::{open_read_only, Database};

    #[test]
    fn test_serve_reads_committed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xp.db");
        let db = Database::open(&path).unwrap();
        db.connection()
            .execute(
                "INSERT INTO xp_events (user_id, exp, event_name, ref_id, created_at)
                 VALUES (?1, 250, 'ReadingExp', 1, 0)",
                params![4],
            )
            .unwrap();

        let conn = open_read_only(&path).unwrap();
        let (tx, mut rx) = oneshot::channel();
        assert!(serve(
            &conn,
            ReadRequest::AccumulatedXp {
                user_id: UserId::new(4),
                response: tx,
            }
        ));
        assert_eq!(rx.try_recv().unwrap().unwrap(), Xp::from_hundredths(250));

        assert!(!serve(&conn, ReadRequest::Shutdown));
    }

    #[test]
    fn test_pooled_reader_stops_on_shutdown() {
        let db = Database::open_in_memory().unwrap();
        let (tx, rx) = mpsc::channel(4);
        let rx = Arc::new(Mutex::new(rx));

        let (page_tx, mut page_rx) = oneshot::channel();
        tx.blocking_send(ReadRequest::Leaderboard {
            request: PageRequest::new(1, 10).unwrap(),
            response: page_tx,
        })
        .unwrap();
        tx.blocking_send(ReadRequest::Shutdown).unwrap();

        run_reader_pooled(db.into_connection(), rx);

        let page = page_rx.try_recv().unwrap().unwrap();
        assert!(page.rows.is_empty());
    }
}
