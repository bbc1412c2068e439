//! # Async API for the XP Ledger
//!
//! [`SigmaXp`] is the handle async services hold. It is cheap to clone and
//! routes every call to a dedicated thread:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Tokio Runtime                            │
//! │  request handlers ──┬── submit / append_award ──────────┐   │
//! │                     └── accumulated_exp / leaderboard ─┐│   │
//! └────────────────────────────────────────────────────────┼┼───┘
//!                                                          ││
//!                       ┌──────────────────────────────────┘│
//!                       ▼                                   ▼
//!            ┌──────────────────────┐        ┌──────────────────────┐
//!            │  Reader threads (N)  │        │  Batch writer thread │
//!            │  read-only conns     │        │  BEGIN IMMEDIATE     │
//!            └──────────┬───────────┘        │   SAVEPOINT unit_i   │
//!                       │                    │  COMMIT              │
//!                       │                    └──────────┬───────────┘
//!                       └──────────────┬────────────────┘
//!                                      ▼
//!                                SQLite (WAL)
//! ```
//!
//! ## The SQLite Challenge
//!
//! `rusqlite::Connection` is `!Sync`, so connections are owned by threads
//! and reached through `tokio::sync::mpsc` with a `oneshot` reply channel
//! per request.
//!
//! ## Read Path
//!
//! File databases get a pool of reader threads, each with its own read-only
//! connection. In-memory databases cannot be reopened by another
//! connection, so their reads are answered by the writer thread between
//! batches (primarily used in tests).
//!
//! ## Read-Your-Writes
//!
//! `submit` resolves only after the batch holding the unit has committed,
//! so any read issued afterwards observes it.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, available_parallelism, JoinHandle};

use chrono::NaiveDate;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::accrual::Award;
use crate::clock::{user_today, SharedClock};
use crate::config::XpConfig;
use crate::error::{Error, Result};
use crate::events::Trigger;
use crate::leaderboard::{LeaderboardPage, PageRequest};
use crate::reader::{self, ReadRequest};
use crate::schema::{open_read_only, Database};
use crate::streak::StreakSummary;
use crate::types::{UserId, Xp, XpEvent, XpSnapshot};
use crate::uow::{UnitOutcome, XpEngine};
use crate::writer::{spawn_batch_writer, BatchWriterHandle, WriterConfig};

/// Minimum number of reader threads.
const MIN_READ_THREADS: usize = 1;

/// Maximum number of reader threads.
const MAX_READ_THREADS: usize = 16;

/// Size of the read request channel.
const READ_CHANNEL_SIZE: usize = 4096;

/// Where reads are sent.
#[derive(Clone)]
enum ReadPath {
    /// Pooled read-only connections.
    Pool(mpsc::Sender<ReadRequest>),
    /// The writer's own connection.
    Writer,
}

/// Async, cloneable handle to an XP ledger.
#[derive(Clone)]
pub struct SigmaXp {
    writer: BatchWriterHandle,
    read_path: ReadPath,
    reader_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    reader_count: usize,
    engine: XpEngine,
}

impl SigmaXp {
    /// Opens (creating if needed) a database file with default batching.
    pub async fn open<P: AsRef<Path>>(path: P, config: XpConfig, clock: SharedClock) -> Result<Self> {
        let engine = XpEngine::new(config, clock)?;
        Self::open_with(path, engine, WriterConfig::default()).await
    }

    /// Opens a database file with a custom engine and writer configuration.
    pub async fn open_with<P: AsRef<Path>>(
        path: P,
        engine: XpEngine,
        writer_config: WriterConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let db = Database::open(path)?;
        let writer = spawn_batch_writer(db.into_connection(), engine.clone(), writer_config)?;

        let reader_count = available_parallelism()
            .map(|n| n.get())
            .unwrap_or(MIN_READ_THREADS)
            .clamp(MIN_READ_THREADS, MAX_READ_THREADS);

        let (read_tx, read_rx) = mpsc::channel(READ_CHANNEL_SIZE);
        let read_rx = Arc::new(std::sync::Mutex::new(read_rx));

        let mut reader_handles = Vec::with_capacity(reader_count);
        for i in 0..reader_count {
            // Opened here so a failure surfaces to the caller.
            let conn = open_read_only(path)?;
            let rx = Arc::clone(&read_rx);

            let handle = thread::Builder::new()
                .name(format!("sigma-xp-reader-{i}"))
                .spawn(move || reader::run_reader_pooled(conn, rx))
                .map_err(|e| Error::Schema(format!("failed to spawn reader thread: {e}")))?;
            reader_handles.push(handle);
        }

        info!(path = %path.display(), readers = reader_count, "xp ledger opened");

        Ok(Self {
            writer,
            read_path: ReadPath::Pool(read_tx),
            reader_handles: Arc::new(Mutex::new(reader_handles)),
            reader_count,
            engine,
        })
    }

    /// Opens a fresh in-memory ledger. Reads go through the writer thread.
    pub async fn open_in_memory(config: XpConfig, clock: SharedClock) -> Result<Self> {
        let engine = XpEngine::new(config, clock)?;
        let db = Database::open_in_memory()?;
        let writer = spawn_batch_writer(db.into_connection(), engine.clone(), WriterConfig::default())?;

        Ok(Self {
            writer,
            read_path: ReadPath::Writer,
            reader_handles: Arc::new(Mutex::new(Vec::new())),
            reader_count: 0,
            engine,
        })
    }

    /// Number of pooled reader threads (zero for in-memory ledgers).
    pub fn reader_count(&self) -> usize {
        self.reader_count
    }

    /// Constants in effect.
    pub fn config(&self) -> &XpConfig {
        self.engine.config()
    }

    /// Today in the users' calendar, per the ledger's clock.
    pub fn today(&self) -> NaiveDate {
        user_today(self.engine.clock().as_ref(), self.engine.offset())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Runs a trigger and all its effects as one unit of work.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] if `cancel` fires before the unit releases
    /// - [`Error::StreakConflict`] if another writer logged the same day
    /// - [`Error::DispatchDepthExceeded`] for runaway handler chains
    /// - [`Error::Sqlite`] if the batch transaction could not begin or commit
    /// - [`Error::Schema`] if the writer has shut down
    ///
    /// In every error case nothing from the unit persists.
    pub async fn submit(&self, trigger: Trigger, cancel: CancellationToken) -> Result<UnitOutcome> {
        self.writer.submit(trigger, cancel).await
    }

    /// Appends an award directly; it is compacted like any rule-made award.
    pub async fn append_award(
        &self,
        user_id: UserId,
        award: Award,
        cancel: CancellationToken,
    ) -> Result<UnitOutcome> {
        self.writer.append_award(user_id, award, cancel).await
    }

    /// Adds or updates a recommendation catalogue entry.
    pub async fn upsert_recommendation(&self, isbn: impl Into<String>, exp: Xp) -> Result<()> {
        self.writer.upsert_recommendation(isbn.into(), exp).await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Accumulated XP truncated to whole points.
    pub async fn accumulated_exp(&self, user_id: UserId) -> Result<i64> {
        Ok(self.accumulated_xp(user_id).await?.truncate())
    }

    /// Exact accumulated XP: latest snapshot plus the tail after it.
    pub async fn accumulated_xp(&self, user_id: UserId) -> Result<Xp> {
        self.read(|response| ReadRequest::AccumulatedXp { user_id, response })
            .await
    }

    /// The user's latest snapshot, if any.
    pub async fn latest_snapshot(&self, user_id: UserId) -> Result<Option<XpSnapshot>> {
        self.read(|response| ReadRequest::LatestSnapshot { user_id, response })
            .await
    }

    /// All of a user's XP events, oldest first.
    pub async fn user_events(&self, user_id: UserId) -> Result<Vec<XpEvent>> {
        self.read(|response| ReadRequest::UserEvents { user_id, response })
            .await
    }

    /// All of a user's snapshots in sequence order.
    pub async fn user_snapshots(&self, user_id: UserId) -> Result<Vec<XpSnapshot>> {
        self.read(|response| ReadRequest::UserSnapshots { user_id, response })
            .await
    }

    /// One page of the XP ranking.
    pub async fn leaderboard(&self, request: PageRequest) -> Result<LeaderboardPage> {
        self.read(|response| ReadRequest::Leaderboard { request, response })
            .await
    }

    /// The user's streak profile as of today.
    pub async fn streak_summary(&self, user_id: UserId) -> Result<StreakSummary> {
        let today = self.today();
        self.read(|response| ReadRequest::StreakSummary {
            user_id,
            today,
            response,
        })
        .await
    }

    async fn read<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> ReadRequest,
    ) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();
        let request = make(response_tx);

        match &self.read_path {
            ReadPath::Pool(tx) => tx
                .send(request)
                .await
                .map_err(|_| Error::Schema("reader pool has shut down".to_string()))?,
            ReadPath::Writer => self.writer.read(request).await?,
        }

        response_rx
            .await
            .map_err(|_| Error::Schema("reader dropped response".to_string()))?
    }

    /// Stops reader threads and flushes the writer.
    ///
    /// After shutdown every operation on any clone of this handle fails.
    pub async fn shutdown(self) {
        if let ReadPath::Pool(tx) = &self.read_path {
            for _ in 0..self.reader_count {
                let _ = tx.send(ReadRequest::Shutdown).await;
            }
        }

        let handles = std::mem::take(&mut *self.reader_handles.lock().await);
        for handle in handles {
            let _ = handle.join();
        }

        self.writer.shutdown().await;
    }
}
