//! # Batch Writer with Group Commit
//!
//! All ledger writes go through one dedicated thread that owns the write
//! connection. Units of work arriving within a short window are executed in
//! one SQLite transaction, each inside its own SAVEPOINT:
//!
//! ```text
//! Without batching:                With batching:
//! ┌──────────────────────────┐     ┌──────────────────────────┐
//! │ unit1 → BEGIN → COMMIT   │     │ BEGIN IMMEDIATE          │
//! │ unit2 → BEGIN → COMMIT   │     │   SAVEPOINT unit_0       │
//! │ unit3 → BEGIN → COMMIT   │     │   SAVEPOINT unit_1       │
//! │ ...                      │     │   SAVEPOINT unit_2       │
//! │ 100 fsyncs               │     │ COMMIT                   │
//! └──────────────────────────┘     │ 1 fsync                  │
//!                                  └──────────────────────────┘
//! ```
//!
//! ## SAVEPOINT Semantics
//!
//! [`XpEngine::execute`] owns the savepoint of each unit:
//!
//! - unit succeeds: `RELEASE` keeps its awards, streak logs and snapshots
//! - unit fails or is cancelled: `ROLLBACK TO` discards all of them
//! - other units in the batch are unaffected
//!
//! A caller only receives its outcome after `COMMIT`. If the commit itself
//! fails, every unit in the batch receives an error and nothing persists.
//!
//! ## Single Writer
//!
//! Because one thread performs every write, the check-then-insert guards in
//! the accrual rules never race inside one process. The UNIQUE constraints
//! on `xp_snapshots` and `streak_logs` still catch writers in other
//! processes sharing the file.

use std::time::{Duration, Instant};

use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::accrual::Award;
use crate::error::{Error, Result};
use crate::events::Trigger;
use crate::reader::{self, ReadRequest};
use crate::recommendations;
use crate::types::{UserId, Xp};
use crate::uow::{UnitOutcome, UnitRequest, XpEngine};

// =============================================================================
// Configuration
// =============================================================================

/// Default batch timeout in milliseconds.
///
/// Units are collected for up to this duration before being executed.
pub const DEFAULT_BATCH_TIMEOUT_MS: u64 = 10;

/// Maximum units per batch.
pub const DEFAULT_BATCH_MAX_SIZE: usize = 256;

/// Size of the request channel.
const REQUEST_CHANNEL_SIZE: usize = 4096;

/// Configuration for the batch writer.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum time to wait for more units before executing a batch.
    pub batch_timeout: Duration,

    /// Maximum units per batch.
    pub batch_max_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_timeout: Duration::from_millis(DEFAULT_BATCH_TIMEOUT_MS),
            batch_max_size: DEFAULT_BATCH_MAX_SIZE,
        }
    }
}

// =============================================================================
// Request Types
// =============================================================================

/// A request sent to the writer thread.
pub enum WriteRequest {
    /// One unit of work. Batched.
    Unit {
        request: UnitRequest,
        cancel: CancellationToken,
        response: oneshot::Sender<Result<UnitOutcome>>,
    },

    /// Catalogue upsert. Executed immediately, outside any batch.
    Recommendation {
        isbn: String,
        exp: Xp,
        response: oneshot::Sender<Result<()>>,
    },

    /// A read served from the write connection (in-memory databases have
    /// no separate reader connections).
    Read(ReadRequest),

    /// Flush the pending batch and stop.
    Shutdown { done: oneshot::Sender<()> },
}

/// A unit waiting for its batch.
struct PendingUnit {
    request: UnitRequest,
    cancel: CancellationToken,
    response: oneshot::Sender<Result<UnitOutcome>>,
}

// =============================================================================
// Batch Writer
// =============================================================================

/// Owns the write connection and executes batches.
///
/// Runs on a dedicated thread; use [`BatchWriterHandle`] from async code.
pub struct BatchWriter {
    conn: Connection,
    engine: XpEngine,
    batches_committed: u64,
}

impl BatchWriter {
    /// Creates a writer over an initialized connection.
    pub fn new(conn: Connection, engine: XpEngine) -> Self {
        Self {
            conn,
            engine,
            batches_committed: 0,
        }
    }

    /// Number of batches committed so far.
    pub fn batches_committed(&self) -> u64 {
        self.batches_committed
    }

    /// Executes a batch of units in one transaction.
    ///
    /// Responses are sent only after the transaction has committed or
    /// failed, so a caller never observes an outcome that could still be
    /// rolled back.
    fn execute_batch(&mut self, batch: Vec<PendingUnit>) {
        let size = batch.len();

        if let Err(e) = self.conn.execute_batch("BEGIN IMMEDIATE") {
            error!(error = %e, size, "batch begin failed");
            for item in batch {
                let _ = item.response.send(Err(batch_error("begin", &e)));
            }
            return;
        }

        let mut completed = Vec::with_capacity(size);
        for (i, item) in batch.into_iter().enumerate() {
            let savepoint = format!("unit_{i}");
            let result = self
                .engine
                .execute(&self.conn, &savepoint, item.request, &item.cancel);
            completed.push((item.response, result));
        }

        match self.conn.execute_batch("COMMIT") {
            Ok(()) => {
                self.batches_committed += 1;
                debug!(size, batch = self.batches_committed, "batch committed");
                for (response, result) in completed {
                    let _ = response.send(result);
                }
            }
            Err(e) => {
                error!(error = %e, size, "batch commit failed");
                let _ = self.conn.execute_batch("ROLLBACK");
                for (response, _) in completed {
                    let _ = response.send(Err(batch_error("commit", &e)));
                }
            }
        }
    }
}

/// Rebuilds a transaction-level failure for one waiter.
///
/// `rusqlite::Error` is not `Clone`; SQLite failures keep their code so a
/// busy or locked database stays `Error::Sqlite`.
fn batch_error(stage: &str, e: &rusqlite::Error) -> Error {
    match e {
        rusqlite::Error::SqliteFailure(code, msg) => {
            Error::Sqlite(rusqlite::Error::SqliteFailure(*code, msg.clone()))
        }
        other => Error::Schema(format!("batch {stage} failed: {other}")),
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Async handle to the writer thread.
#[derive(Clone)]
pub struct BatchWriterHandle {
    tx: mpsc::Sender<WriteRequest>,
}

impl BatchWriterHandle {
    /// Runs a trigger as one unit of work.
    pub async fn submit(&self, trigger: Trigger, cancel: CancellationToken) -> Result<UnitOutcome> {
        self.unit(UnitRequest::Trigger(trigger), cancel).await
    }

    /// Appends an award directly as one unit of work.
    pub async fn append_award(
        &self,
        user_id: UserId,
        award: Award,
        cancel: CancellationToken,
    ) -> Result<UnitOutcome> {
        self.unit(UnitRequest::Award { user_id, award }, cancel).await
    }

    async fn unit(&self, request: UnitRequest, cancel: CancellationToken) -> Result<UnitOutcome> {
        let (response_tx, response_rx) = oneshot::channel();

        self.send(WriteRequest::Unit {
            request,
            cancel,
            response: response_tx,
        })
        .await?;

        response_rx
            .await
            .map_err(|_| Error::Schema("writer dropped response".to_string()))?
    }

    /// Adds or updates a recommendation catalogue entry.
    pub async fn upsert_recommendation(&self, isbn: String, exp: Xp) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();

        self.send(WriteRequest::Recommendation {
            isbn,
            exp,
            response: response_tx,
        })
        .await?;

        response_rx
            .await
            .map_err(|_| Error::Schema("writer dropped response".to_string()))?
    }

    /// Forwards a read to the write connection.
    pub(crate) async fn read(&self, request: ReadRequest) -> Result<()> {
        self.send(WriteRequest::Read(request)).await
    }

    /// Flushes the pending batch and stops the writer thread.
    ///
    /// Returns once the final batch has committed.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.send(WriteRequest::Shutdown { done: done_tx }).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    async fn send(&self, request: WriteRequest) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| Error::Schema("writer has shut down".to_string()))
    }
}

// =============================================================================
// Writer Loop
// =============================================================================

/// Runs the writer loop until shutdown or until every handle is dropped.
pub async fn run_batch_writer(
    mut writer: BatchWriter,
    mut rx: mpsc::Receiver<WriteRequest>,
    config: WriterConfig,
) {
    let mut batch: Vec<PendingUnit> = Vec::new();
    let mut batch_start: Option<Instant> = None;

    loop {
        let wait_timeout = match batch_start {
            // No pending units: wait effectively forever.
            None => Duration::from_secs(3600),
            Some(start) => config.batch_timeout.saturating_sub(start.elapsed()),
        };

        match timeout(wait_timeout, rx.recv()).await {
            Ok(Some(WriteRequest::Unit {
                request,
                cancel,
                response,
            })) => {
                if batch.is_empty() {
                    batch_start = Some(Instant::now());
                }

                batch.push(PendingUnit {
                    request,
                    cancel,
                    response,
                });

                if batch.len() >= config.batch_max_size {
                    writer.execute_batch(std::mem::take(&mut batch));
                    batch_start = None;
                }
            }
            Ok(Some(WriteRequest::Recommendation {
                isbn,
                exp,
                response,
            })) => {
                let result = recommendations::upsert_recommendation(&writer.conn, &isbn, exp);
                let _ = response.send(result);
            }
            Ok(Some(WriteRequest::Read(request))) => {
                reader::serve(&writer.conn, request);
            }
            Ok(Some(WriteRequest::Shutdown { done })) => {
                if !batch.is_empty() {
                    writer.execute_batch(std::mem::take(&mut batch));
                }
                info!(batches = writer.batches_committed, "batch writer stopped");
                let _ = done.send(());
                break;
            }
            Ok(None) => {
                if !batch.is_empty() {
                    writer.execute_batch(std::mem::take(&mut batch));
                }
                break;
            }
            Err(_) => {
                if !batch.is_empty() {
                    writer.execute_batch(std::mem::take(&mut batch));
                }
                batch_start = None;
            }
        }
    }
}

/// Spawns the writer on a dedicated thread.
pub fn spawn_batch_writer(
    conn: Connection,
    engine: XpEngine,
    config: WriterConfig,
) -> Result<BatchWriterHandle> {
    let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_SIZE);
    let writer = BatchWriter::new(conn, engine);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Schema(format!("failed to create writer runtime: {e}")))?;

    std::thread::Builder::new()
        .name("sigma-xp-batch-writer".to_string())
        .spawn(move || rt.block_on(run_batch_writer(writer, rx, config)))
        .map_err(|e| Error::Schema(format!("failed to spawn writer thread: {e}")))?;

    Ok(BatchWriterHandle { tx })
}

// =============================================================================
// Tests
// =============================================================================
