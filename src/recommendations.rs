//! Recommendation catalogue lookups.
//!
//! The catalogue belongs to an external collaborator. The completion rule
//! only asks "is this ISBN recommended, and for how much?";
//! [`upsert_recommendation`] exists so collaborators and tests can seed it.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::types::Xp;

/// Returns the configured XP for a recommended ISBN, or `None` if the ISBN is
/// not catalogued.
pub fn recommendation_exp(conn: &Connection, isbn: &str) -> Result<Option<Xp>> {
    let exp: Option<i64> = conn
        .query_row(
            "SELECT exp FROM reading_recommendations WHERE isbn = ?1",
            [isbn],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exp.map(Xp::from_hundredths))
}

/// Inserts or replaces a catalogue entry.
pub fn upsert_recommendation(conn: &Connection, isbn: &str, exp: Xp) -> Result<()> {
    conn.execute(
        "INSERT INTO reading_recommendations (isbn, exp) VALUES (?1, ?2)
         ON CONFLICT(isbn) DO UPDATE SET exp = excluded.exp",
        params![isbn, exp.as_hundredths()],
    )?;
    Ok(())
}
