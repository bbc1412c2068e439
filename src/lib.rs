//! # Sigma XP - Experience-Point Ledger
//!
//! Sigma XP records the experience points readers earn in a reading app. It
//! provides:
//!
//! - **An append-only ledger**: every award is an immutable `xp_events` row
//! - **Snapshot compaction**: a running total folded in every N events, so
//!   balances are read in bounded time
//! - **Streaks**: one log per qualifying day, with a bonus every 7th day
//! - **Leaderboards**: paged ranking over snapshot-plus-tail totals
//! - **Idempotent rules**: retried triggers never pay twice
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │        SigmaXp (async handle)   /   XpStore (blocking)          │
//! │          submit(trigger) · append_award · reads                 │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Unit of Work (SAVEPOINT)                      │
//! │                                                                 │
//! │  pass 1 ── trigger ──► handlers ── append / log ──┐             │
//! │  pass 2 ── UserExpCreated, StreakLogCreated ──► snapshot,       │
//! │            streak bonus ─────────────────────────┐│             │
//! │  pass 3 ── UserExpCreated(bonus) ──► snapshot    ││             │
//! └─────────────────────────────┬────────────────────┴┴─────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │   SQLite: xp_events · xp_snapshots · streak_logs · leaderboard  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Ledger is truth**: events are never updated or deleted
//! 2. **Snapshot correctness**: `exp` of snapshot k equals the sum of the
//!    user's events with `id <= last_event_id`
//! 3. **Contiguous snapshots**: `snapshot_seq` runs 1, 2, 3, … per user
//! 4. **One day, one log**: at most one streak log per user per date
//! 5. **Atomic units**: a trigger's effects all commit or none do
//!
//! ## Module Organization
//!
//! - [`error`]: error type for all failure modes
//! - [`types`]: identifiers, fixed-point [`Xp`], entities and trigger inputs
//! - [`schema`]: SQLite DDL and database initialization
//! - [`config`], [`clock`]: constants and the injectable time source
//! - [`ledger`], [`snapshot`], [`streak`], [`recommendations`]: storage operations
//! - [`accrual`]: pure award rules
//! - [`events`], [`dispatch`], [`uow`]: domain events, handlers, unit of work
//! - [`leaderboard`]: paged ranking
//! - [`storage`]: blocking store; [`writer`], [`reader`], [`api`]: async stack

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for ledger operations.
pub mod error;

/// Domain types: identifiers, XP amounts, entities and trigger inputs.
pub mod types;

/// SQLite schema definitions and database initialization.
pub mod schema;

/// Accrual constants, loaded from the environment.
pub mod config;

/// Injectable time source and the users' calendar.
pub mod clock;

/// Append-only XP event storage and range queries.
pub mod ledger;

/// Snapshot compaction and balance reads.
pub mod snapshot;

/// Streak logs and streak length derivation.
pub mod streak;

/// Recommended-book catalogue.
pub mod recommendations;

/// Pure award rules.
///
/// Every rule is a function of its inputs plus the facts a handler read from
/// storage. No I/O happens here.
pub mod accrual;

/// Triggers and domain events.
pub mod events;

/// Handler registry and the built-in handlers.
pub mod dispatch;

/// Unit of work: one trigger, all its effects, one savepoint.
pub mod uow;

/// Paged XP ranking.
pub mod leaderboard;

/// Blocking store over a single connection.
pub mod storage;

/// Batch writer with group commit.
///
/// Units arriving within a short window (default 10ms) share one SQLite
/// transaction; each runs in its own SAVEPOINT so one failure rolls back
/// alone.
pub mod writer;

/// Pooled read-only connections.
pub mod reader;

/// Async API. The main entry point is [`SigmaXp`](api::SigmaXp).
pub mod api;

// =============================================================================
// Re-exports
// =============================================================================

pub use accrual::Award;
pub use api::SigmaXp;
pub use clock::{Clock, MutableClock, SharedClock};
pub use config::{XpConfig, XpSettings};
pub use error::{Error, Result};
pub use events::{DomainEvent, QuizAnswered, Trigger};
pub use leaderboard::{LeaderboardEntry, LeaderboardPage, PageRequest};
pub use schema::Database;
pub use storage::XpStore;
pub use streak::{DayStatus, StreakSummary};
pub use uow::{UnitOutcome, XpEngine};
pub use writer::{spawn_batch_writer, BatchWriterHandle, WriterConfig};

pub use types::{
    DailyRead, EventId, ExpEventType, QuizAnswer, QuizQuestion, ReadingReport, ReadingResource,
    RefId, SnapshotSeq, StreakLog, UserId, Xp, XpEvent, XpSnapshot,
};
