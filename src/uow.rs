//! # Unit of Work
//!
//! Runs one trigger and every effect it causes as a single all-or-nothing
//! change, scoped by a SQLite `SAVEPOINT`.
//!
//! ## Dispatch Passes
//!
//! ```text
//! SAVEPOINT unit
//!   pass 1: [ReadingReportCreated]
//!             ReadingExp        → append e1        raises UserExpCreated(e1)
//!             BookCompletion    → append e2        raises UserExpCreated(e2)
//!             StreakFromReport  → log 2026-03-02   raises StreakLogCreated
//!   pass 2: [UserExpCreated(e1), UserExpCreated(e2), StreakLogCreated]
//!             Snapshot, Snapshot
//!             StreakExp         → append e3        raises UserExpCreated(e3)
//!   pass 3: [UserExpCreated(e3)]
//!             Snapshot
//!   (nothing raised) → RELEASE unit
//! ```
//!
//! An event is dispatched in the pass after the one that raised it, never in
//! its own. A unit that is still raising events after `max_dispatch_passes`
//! passes is aborted with [`Error::DispatchDepthExceeded`].
//!
//! ## Nesting
//!
//! Outside a transaction the savepoint *is* the transaction and `RELEASE`
//! commits. Inside the writer's `BEGIN IMMEDIATE` batch it nests, so one
//! failing unit rolls back alone.
//!
//! ## Cancellation
//!
//! The token is checked before the savepoint opens, before every pass, and
//! right before `RELEASE`. A cancelled unit rolls back and returns
//! [`Error::Cancelled`].

use std::sync::Arc;

use chrono::FixedOffset;
use rusqlite::Connection;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use crate::accrual::Award;
use crate::clock::{local_date, SharedClock};
use crate::config::XpConfig;
use crate::dispatch::{default_registry, HandlerContext, HandlerRegistry};
use crate::error::{Error, Result};
use crate::events::{DomainEvent, Trigger};
use crate::types::{StreakLog, UserId, XpEvent, XpSnapshot};

/// Everything a committed unit of work wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnitOutcome {
    /// XP events appended, in append order.
    pub awards: Vec<XpEvent>,
    /// Streak logs inserted.
    pub streak_logs: Vec<StreakLog>,
    /// Snapshots taken.
    pub snapshots: Vec<XpSnapshot>,
    /// Dispatch passes executed.
    pub passes: usize,
}

/// What a unit of work starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitRequest {
    /// A collaborator's action, dispatched to its handlers.
    Trigger(Trigger),
    /// An award decided outside the rules, appended as-is.
    Award {
        /// Who receives it.
        user_id: UserId,
        /// What to append.
        award: Award,
    },
}

impl UnitRequest {
    /// The user the unit belongs to.
    pub fn user_id(&self) -> UserId {
        match self {
            UnitRequest::Trigger(trigger) => trigger.user_id(),
            UnitRequest::Award { user_id, .. } => *user_id,
        }
    }
}

impl From<Trigger> for UnitRequest {
    fn from(trigger: Trigger) -> Self {
        UnitRequest::Trigger(trigger)
    }
}

/// The accrual engine: handler registry, constants and time source.
///
/// Cheap to clone; the writer thread and the synchronous store each hold one.
#[derive(Clone)]
pub struct XpEngine {
    registry: Arc<HandlerRegistry>,
    config: XpConfig,
    offset: FixedOffset,
    clock: SharedClock,
}

impl XpEngine {
    /// Creates an engine with the default handler subscriptions.
    pub fn new(config: XpConfig, clock: SharedClock) -> Result<Self> {
        Self::with_registry(config, clock, default_registry())
    }

    /// Creates an engine with a custom registry.
    pub fn with_registry(
        config: XpConfig,
        clock: SharedClock,
        registry: HandlerRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let offset = config.user_offset()?;
        Ok(Self {
            registry: Arc::new(registry),
            config,
            offset,
            clock,
        })
    }

    /// Accrual constants.
    pub fn config(&self) -> &XpConfig {
        &self.config
    }

    /// Offset of the users' calendar.
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Time source.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Runs `trigger` as a unit of work inside `SAVEPOINT <savepoint>`.
    ///
    /// # Errors
    ///
    /// Any handler or storage error, [`Error::DispatchDepthExceeded`] or
    /// [`Error::Cancelled`]. In every error case the savepoint has been rolled
    /// back and nothing from this unit persists.
    pub fn run(
        &self,
        conn: &Connection,
        savepoint: &str,
        trigger: Trigger,
        cancel: &CancellationToken,
    ) -> Result<UnitOutcome> {
        self.execute(conn, savepoint, UnitRequest::Trigger(trigger), cancel)
    }

    /// Runs any [`UnitRequest`] inside `SAVEPOINT <savepoint>`.
    ///
    /// A direct award is appended first; its `UserExpCreated` then goes
    /// through the same passes as a trigger's effects, so it is compacted
    /// like any other award.
    #[instrument(name = "unit_of_work", skip_all, fields(user_id = %request.user_id(), savepoint = %savepoint))]
    pub fn execute(
        &self,
        conn: &Connection,
        savepoint: &str,
        request: UnitRequest,
        cancel: &CancellationToken,
    ) -> Result<UnitOutcome> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        conn.execute_batch(&format!("SAVEPOINT {savepoint}"))?;

        let result = self.dispatch_passes(conn, request, cancel).and_then(|outcome| {
            if cancel.is_cancelled() {
                Err(Error::Cancelled)
            } else {
                Ok(outcome)
            }
        });

        match result {
            Ok(outcome) => {
                conn.execute_batch(&format!("RELEASE {savepoint}"))?;
                debug!(
                    awards = outcome.awards.len(),
                    snapshots = outcome.snapshots.len(),
                    passes = outcome.passes,
                    "unit of work released"
                );
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback) =
                    conn.execute_batch(&format!("ROLLBACK TO {savepoint}; RELEASE {savepoint}"))
                {
                    error!(error = %e, rollback_error = %rollback, "unit of work rollback failed");
                    return Err(Error::RollbackFailed {
                        rollback,
                        cause: Box::new(e),
                    });
                }
                debug!(error = %e, "unit of work rolled back");
                Err(e)
            }
        }
    }

    fn dispatch_passes(
        &self,
        conn: &Connection,
        request: UnitRequest,
        cancel: &CancellationToken,
    ) -> Result<UnitOutcome> {
        let now = self.clock.utc();
        let today = local_date(now, self.offset);
        let mut ctx = HandlerContext::new(conn, &self.config, now, today);

        match request {
            UnitRequest::Trigger(trigger) => ctx.raise(trigger.into()),
            UnitRequest::Award { user_id, award } => {
                ctx.append_award(user_id, award)?;
            }
        }

        let mut pending: Vec<DomainEvent> = ctx.take_raised();
        let mut passes = 0;

        while !pending.is_empty() {
            if passes == self.config.max_dispatch_passes {
                return Err(Error::DispatchDepthExceeded { passes });
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            passes += 1;

            for event in &pending {
                self.registry.dispatch(event, &mut ctx)?;
            }
            pending = ctx.take_raised();
        }

        let mut outcome = ctx.into_outcome();
        outcome.passes = passes;
        Ok(outcome)
    }
}

impl std::fmt::Debug for XpEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XpEngine")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::clock::MutableClock;
    use crate::dispatch::{Handler, ReadingExpHandler};
    use crate::events::DomainEventKind;
    use crate::ledger;
    use crate::schema::Database;
    use crate::types::{ExpEventType, ReadingReport, ReadingResource, UserId, Xp};

    fn clock() -> SharedClock {
        Arc::new(MutableClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap(),
        ))
    }

    fn finished_book(id: i64) -> Trigger {
        Trigger::ReadingReportCreated(ReadingReport {
            id,
            user_id: UserId::new(1),
            current_page: 100,
            resource: ReadingResource {
                id: 1,
                total_pages: 100,
                isbn: None,
            },
        })
    }

    #[test]
    fn test_reading_report_settles_in_passes() {
        let db = Database::open_in_memory().unwrap();
        let engine = XpEngine::new(XpConfig::default(), clock()).unwrap();

        let outcome = engine
            .run(db.connection(), "unit", finished_book(1), &CancellationToken::new())
            .unwrap();

        // pass 1: trigger; pass 2: two UserExpCreated + StreakLogCreated.
        assert_eq!(outcome.passes, 2);
        assert_eq!(outcome.awards.len(), 2);
        assert_eq!(outcome.streak_logs.len(), 1);
        assert_eq!(ledger::events_for_user(db.connection(), UserId::new(1)).unwrap().len(), 2);
    }

    #[test]
    fn test_direct_award_is_compacted_like_any_other() {
        let db = Database::open_in_memory().unwrap();
        let config = XpConfig {
            snapshot_event_interval: 1,
            ..XpConfig::default()
        };
        let engine = XpEngine::new(config, clock()).unwrap();

        let outcome = engine
            .execute(
                db.connection(),
                "unit",
                UnitRequest::Award {
                    user_id: UserId::new(9),
                    award: Award {
                        event_type: ExpEventType::StreakExp,
                        amount: Xp::from_whole(10),
                        ref_id: crate::types::RefId::new(1),
                    },
                },
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(outcome.awards.len(), 1);
        assert_eq!(outcome.snapshots.len(), 1);
        assert_eq!(outcome.passes, 1);
    }

    #[test]
    fn test_cancelled_before_start_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let engine = XpEngine::new(XpConfig::default(), clock()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine
            .run(db.connection(), "unit", finished_book(1), &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(ledger::events_for_user(db.connection(), UserId::new(1))
            .unwrap()
            .is_empty());
    }

    /// Cancels the token from inside the unit, after its first write.
    struct CancelMidway(CancellationToken);

    impl Handler for CancelMidway {
        fn name(&self) -> &'static str {
            "CancelMidway"
        }

        fn handle(&self, _event: &DomainEvent, _ctx: &mut HandlerContext<'_>) -> Result<()> {
            self.0.cancel();
            Ok(())
        }
    }

    #[test]
    fn test_cancelled_midway_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        let mut registry = HandlerRegistry::new();
        registry
            .register(DomainEventKind::ReadingReportCreated, ReadingExpHandler)
            .register(DomainEventKind::ReadingReportCreated, CancelMidway(cancel.clone()));
        let engine = XpEngine::with_registry(XpConfig::default(), clock(), registry).unwrap();

        let err = engine
            .run(db.connection(), "unit", finished_book(1), &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(ledger::events_for_user(db.connection(), UserId::new(1))
            .unwrap()
            .is_empty());
    }

    /// Ends the unit's savepoint early, then fails.
    struct ReleaseThenFail;

    impl Handler for ReleaseThenFail {
        fn name(&self) -> &'static str {
            "ReleaseThenFail"
        }

        fn handle(&self, _event: &DomainEvent, ctx: &mut HandlerContext<'_>) -> Result<()> {
            ctx.conn().execute_batch("RELEASE unit")?;
            Err(Error::Schema("handler failed".to_string()))
        }
    }

    #[test]
    fn test_failed_rollback_keeps_original_error() {
        let db = Database::open_in_memory().unwrap();
        let mut registry = HandlerRegistry::new();
        registry.register(DomainEventKind::ReadingReportCreated, ReleaseThenFail);
        let engine = XpEngine::with_registry(XpConfig::default(), clock(), registry).unwrap();

        let err = engine
            .run(db.connection(), "unit", finished_book(1), &CancellationToken::new())
            .unwrap_err();
        match err {
            Error::RollbackFailed { cause, .. } => {
                assert!(matches!(*cause, Error::Schema(ref m) if m == "handler failed"));
            }
            other => panic!("expected RollbackFailed, got {other:?}"),
        }
    }

    /// Raises another report for every report: a cycle.
    struct Echo;

    impl Handler for Echo {
        fn name(&self) -> &'static str {
            "Echo"
        }

        fn handle(&self, event: &DomainEvent, ctx: &mut HandlerContext<'_>) -> Result<()> {
            ctx.raise(event.clone());
            Ok(())
        }
    }

    #[test]
    fn test_handler_cycle_hits_pass_limit() {
        let db = Database::open_in_memory().unwrap();
        let mut registry = HandlerRegistry::new();
        registry
            .register(DomainEventKind::ReadingReportCreated, ReadingExpHandler)
            .register(DomainEventKind::ReadingReportCreated, Echo);
        let engine = XpEngine::with_registry(XpConfig::default(), clock(), registry).unwrap();

        let err = engine
            .run(db.connection(), "unit", finished_book(1), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::DispatchDepthExceeded { passes: 8 }));
        assert!(ledger::events_for_user(db.connection(), UserId::new(1))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_failed_unit_leaves_earlier_units_intact() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let engine = XpEngine::new(XpConfig::default(), clock()).unwrap();

        conn.execute_batch("BEGIN IMMEDIATE").unwrap();
        engine
            .run(conn, "unit_0", finished_book(1), &CancellationToken::new())
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(engine.run(conn, "unit_1", finished_book(2), &cancel).is_err());
        conn.execute_batch("COMMIT").unwrap();

        let events = ledger::events_for_user(conn, UserId::new(1)).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, ExpEventType::ReadingExp);
        assert_eq!(events[0].amount, Xp::from_whole(10));
    }
}
