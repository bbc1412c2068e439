//! # Leaderboard Projector
//!
//! A read-only, paged ranking over the `xp_leaderboard` view, which applies
//! the same snapshot-plus-tail formula as
//! [`snapshot::accumulated_xp`](crate::snapshot::accumulated_xp).
//!
//! Ranks come from result position: `rank = (page - 1) * page_size + index + 1`.
//! Users with equal totals are ordered by `user_id` ascending, so paging is
//! stable but ties still get distinct ranks.

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::types::{UserId, Xp};

/// Largest page size accepted.
pub const MAX_PAGE_SIZE: u32 = 100;

/// A 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Page number, starting at 1.
    pub page: u32,
    /// Rows per page, `1..=MAX_PAGE_SIZE`.
    pub page_size: u32,
}

impl PageRequest {
    /// Validates and creates a page request.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPage`] if `page` is zero or `page_size` is outside
    /// `1..=MAX_PAGE_SIZE`.
    pub fn new(page: u32, page_size: u32) -> Result<Self> {
        if page == 0 || page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(Error::InvalidPage { page, page_size });
        }
        Ok(Self { page, page_size })
    }

    fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

/// One ranked row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    /// 1-based position in the full ranking.
    pub rank: u64,
    /// The ranked user.
    pub user_id: UserId,
    /// Exact accumulated XP.
    pub exp: Xp,
}

/// One page of the ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardPage {
    /// Rows of this page, best first.
    pub rows: Vec<LeaderboardEntry>,
    /// Requested page.
    pub page: u32,
    /// Requested page size.
    pub page_size: u32,
    /// Users with at least one XP event.
    pub total_rows: u64,
    /// `ceil(total_rows / page_size)`.
    pub total_pages: u64,
}

/// Returns one page of the XP ranking.
///
/// A page past the end has no rows but still reports the totals.
pub fn query_leaderboard(conn: &Connection, request: PageRequest) -> Result<LeaderboardPage> {
    let total_rows: i64 =
        conn.query_row("SELECT COUNT(*) FROM xp_leaderboard", [], |row| row.get(0))?;
    let total_rows = total_rows as u64;

    let offset = request.offset();
    let mut stmt = conn.prepare(
        "SELECT user_id, exp FROM xp_leaderboard
         ORDER BY exp DESC, user_id ASC
         LIMIT ?1 OFFSET ?2",
    )?;
    let rows = stmt
        .query_map(params![i64::from(request.page_size), offset as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let rows = rows
        .into_iter()
        .enumerate()
        .map(|(index, (user_id, exp))| LeaderboardEntry {
            rank: offset + index as u64 + 1,
            user_id: UserId::new(user_id),
            exp: Xp::from_hundredths(exp),
        })
        .collect();

    Ok(LeaderboardPage {
        rows,
        page: request.page,
        page_size: request.page_size,
        total_rows,
        total_pages: total_rows.div_ceil(u64::from(request.page_size)),
    })
}
