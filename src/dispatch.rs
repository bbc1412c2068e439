//! # Domain Event Dispatcher
//!
//! An explicit registry from [`DomainEventKind`] to an ordered list of
//! handlers. There is no runtime discovery: [`default_registry`] spells out
//! every subscription.
//!
//! ## Default Subscriptions
//!
//! ```text
//! ReadingReportCreated ──► ReadingExp ──► BookCompletion ──► StreakFromReadingReport
//! QuizAnswered ──────────► DailyReadsExp ──► StreakFromQuizAnswer
//! StreakLogCreated ──────► StreakExp
//! UserExpCreated ────────► Snapshot
//! ```
//!
//! Handlers for one kind run in registration order. Nothing is promised about
//! the order across kinds.
//!
//! ## Raising Events
//!
//! Handlers never call the dispatcher themselves. Anything they raise lands in
//! the [`HandlerContext`] and the unit of work dispatches it in the next pass
//! (see [`uow`](crate::uow)). [`HandlerContext::append_award`] raises
//! `UserExpCreated` for every XP event it appends, and
//! [`HandlerContext::record_streak_day`] raises `StreakLogCreated` for every
//! new streak log.
//!
//! ## Failure
//!
//! A handler error stops the pass and propagates; the unit of work rolls back
//! everything, the trigger's other handlers included.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use tracing::{debug, instrument};

use crate::accrual::{self, Award};
use crate::config::XpConfig;
use crate::error::Result;
use crate::events::{DomainEvent, DomainEventKind};
use crate::types::{ExpEventType, RefId, StreakLog, UserId, XpEvent};
use crate::uow::UnitOutcome;
use crate::{ledger, recommendations, snapshot, streak};

// =============================================================================
// Handler Trait
// =============================================================================

/// Reacts to one kind of domain event inside a unit of work.
///
/// # Rust Pattern: Trait Objects in a Registry
///
/// The registry stores `Box<dyn Handler>`, so handlers of different concrete
/// types share one ordered list. `Send + Sync` lets the registry live behind
/// an `Arc` on the writer thread.
pub trait Handler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Handles one event. Events of other kinds are ignored.
    fn handle(&self, event: &DomainEvent, ctx: &mut HandlerContext<'_>) -> Result<()>;
}

// =============================================================================
// Handler Context
// =============================================================================

/// Everything a handler may touch during one unit of work.
///
/// `now` and `today` are read from the clock once per unit, so every award
/// and streak day of a unit agrees on the time.
pub struct HandlerContext<'a> {
    conn: &'a Connection,
    config: &'a XpConfig,
    now: DateTime<Utc>,
    today: NaiveDate,
    raised: Vec<DomainEvent>,
    outcome: UnitOutcome,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(
        conn: &'a Connection,
        config: &'a XpConfig,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Self {
        Self {
            conn,
            config,
            now,
            today,
            raised: Vec::new(),
            outcome: UnitOutcome::default(),
        }
    }

    /// The unit of work's connection, inside its savepoint.
    pub fn conn(&self) -> &Connection {
        self.conn
    }

    /// Accrual constants.
    pub fn config(&self) -> &XpConfig {
        self.config
    }

    /// The unit's instant.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// The unit's date in the users' calendar.
    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Queues an event for the next dispatch pass.
    pub fn raise(&mut self, event: DomainEvent) {
        self.raised.push(event);
    }

    /// Appends an award to the ledger and raises `UserExpCreated` for it.
    pub fn append_award(&mut self, user_id: UserId, award: Award) -> Result<XpEvent> {
        let event = ledger::append(
            self.conn,
            user_id,
            award.amount,
            award.event_type,
            award.ref_id,
            self.now,
        )?;
        debug!(
            %user_id,
            event_id = %event.id,
            event_type = %event.event_type,
            amount = %event.amount,
            "xp awarded"
        );
        self.outcome.awards.push(event.clone());
        self.raise(DomainEvent::UserExpCreated(event.clone()));
        Ok(event)
    }

    /// Logs today as a qualifying day and raises `StreakLogCreated` if it is new.
    pub fn record_streak_day(&mut self, user_id: UserId) -> Result<Option<StreakLog>> {
        let log = streak::record_qualifying_day(self.conn, user_id, self.today, self.now)?;
        if let Some(log) = &log {
            debug!(%user_id, date = %log.streak_date, "streak day logged");
            self.outcome.streak_logs.push(log.clone());
            self.raise(DomainEvent::StreakLogCreated(log.clone()));
        }
        Ok(log)
    }

    pub(crate) fn take_raised(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.raised)
    }

    pub(crate) fn outcome_mut(&mut self) -> &mut UnitOutcome {
        &mut self.outcome
    }

    pub(crate) fn into_outcome(self) -> UnitOutcome {
        self.outcome
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Ordered handler lists keyed by event kind.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<DomainEventKind, Vec<Box<dyn Handler>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler to the list for `kind`.
    pub fn register(&mut self, kind: DomainEventKind, handler: impl Handler + 'static) -> &mut Self {
        self.handlers.entry(kind).or_default().push(Box::new(handler));
        self
    }

    /// Handler names for `kind`, in invocation order.
    pub fn handler_names(&self, kind: DomainEventKind) -> Vec<&'static str> {
        self.handlers
            .get(&kind)
            .map(|hs| hs.iter().map(|h| h.name()).collect())
            .unwrap_or_default()
    }

    /// Invokes every handler registered for the event's kind, in order.
    ///
    /// Stops at the first error.
    pub fn dispatch(&self, event: &DomainEvent, ctx: &mut HandlerContext<'_>) -> Result<()> {
        let Some(handlers) = self.handlers.get(&event.kind()) else {
            return Ok(());
        };
        for handler in handlers {
            handler.handle(event, ctx)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort();
        let mut map = f.debug_map();
        for kind in kinds {
            map.entry(&kind, &self.handler_names(kind));
        }
        map.finish()
    }
}

/// The production subscriptions.
pub fn default_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register(DomainEventKind::ReadingReportCreated, ReadingExpHandler)
        .register(DomainEventKind::ReadingReportCreated, BookCompletionHandler)
        .register(DomainEventKind::ReadingReportCreated, StreakFromReadingReportHandler)
        .register(DomainEventKind::QuizAnswered, DailyReadsExpHandler)
        .register(DomainEventKind::QuizAnswered, StreakFromQuizAnswerHandler)
        .register(DomainEventKind::StreakLogCreated, StreakExpHandler)
        .register(DomainEventKind::UserExpCreated, SnapshotHandler);
    registry
}

// =============================================================================
// Handlers
// =============================================================================

/// Awards ReadingExp for every reading report.
pub struct ReadingExpHandler;

impl Handler for ReadingExpHandler {
    fn name(&self) -> &'static str {
        "ReadingExp"
    }

    #[instrument(name = "reading_exp", skip_all, fields(user_id = %event.user_id()))]
    fn handle(&self, event: &DomainEvent, ctx: &mut HandlerContext<'_>) -> Result<()> {
        let DomainEvent::ReadingReportCreated(report) = event else {
            return Ok(());
        };
        let award = accrual::reading_exp(report, ctx.config());
        ctx.append_award(report.user_id, award)?;
        Ok(())
    }
}

/// Awards BookCompleted or RecommendedBookCompleted when a report reaches the
/// last page.
pub struct BookCompletionHandler;

impl Handler for BookCompletionHandler {
    fn name(&self) -> &'static str {
        "BookCompletion"
    }

    #[instrument(name = "book_completion", skip_all, fields(user_id = %event.user_id()))]
    fn handle(&self, event: &DomainEvent, ctx: &mut HandlerContext<'_>) -> Result<()> {
        let DomainEvent::ReadingReportCreated(report) = event else {
            return Ok(());
        };
        if !report.completes_resource() {
            return Ok(());
        }

        let recommendation = match report.resource.isbn.as_deref() {
            Some(isbn) => recommendations::recommendation_exp(ctx.conn(), isbn)?,
            None => None,
        };
        let last_completed = match recommendation {
            Some(_) => None,
            None => ledger::last_of_type(ctx.conn(), report.user_id, ExpEventType::BookCompleted)?
                .map(|e| e.created_at),
        };

        match accrual::book_completion(report, recommendation, last_completed, ctx.now(), ctx.config()) {
            Some(award) => {
                ctx.append_award(report.user_id, award)?;
            }
            None => debug!(report_id = report.id, "book completion inside cooldown"),
        }
        Ok(())
    }
}

/// Logs a streak day for every reading report.
pub struct StreakFromReadingReportHandler;

impl Handler for StreakFromReadingReportHandler {
    fn name(&self) -> &'static str {
        "StreakFromReadingReport"
    }

    fn handle(&self, event: &DomainEvent, ctx: &mut HandlerContext<'_>) -> Result<()> {
        let DomainEvent::ReadingReportCreated(report) = event else {
            return Ok(());
        };
        ctx.record_streak_day(report.user_id)?;
        Ok(())
    }
}

/// Awards DailyReadsExp the first time a daily read's quiz is passed.
pub struct DailyReadsExpHandler;

impl Handler for DailyReadsExpHandler {
    fn name(&self) -> &'static str {
        "DailyReadsExp"
    }

    #[instrument(name = "daily_reads_exp", skip_all, fields(user_id = %event.user_id()))]
    fn handle(&self, event: &DomainEvent, ctx: &mut HandlerContext<'_>) -> Result<()> {
        let DomainEvent::QuizAnswered(quiz) = event else {
            return Ok(());
        };

        let score = accrual::score_quiz(&quiz.daily_read, &quiz.questions, &quiz.answers);
        let already_awarded = score.passed
            && ledger::exists(
                ctx.conn(),
                quiz.user_id,
                ExpEventType::DailyReadsExp,
                RefId::new(quiz.daily_read.id),
            )?;

        match accrual::daily_reads_exp(&quiz.daily_read, score, already_awarded) {
            Some(award) => {
                ctx.append_award(quiz.user_id, award)?;
            }
            None => debug!(
                daily_read_id = quiz.daily_read.id,
                correct = score.correct,
                passed = score.passed,
                already_awarded,
                "no daily read award"
            ),
        }
        Ok(())
    }
}

/// Logs a streak day when a quiz is passed.
pub struct StreakFromQuizAnswerHandler;

impl Handler for StreakFromQuizAnswerHandler {
    fn name(&self) -> &'static str {
        "StreakFromQuizAnswer"
    }

    fn handle(&self, event: &DomainEvent, ctx: &mut HandlerContext<'_>) -> Result<()> {
        let DomainEvent::QuizAnswered(quiz) = event else {
            return Ok(());
        };
        let score = accrual::score_quiz(&quiz.daily_read, &quiz.questions, &quiz.answers);
        if score.passed {
            ctx.record_streak_day(quiz.user_id)?;
        }
        Ok(())
    }
}

/// Awards the streak bonus when a new log completes a multiple of the interval.
pub struct StreakExpHandler;

impl Handler for StreakExpHandler {
    fn name(&self) -> &'static str {
        "StreakExp"
    }

    #[instrument(name = "streak_exp", skip_all, fields(user_id = %event.user_id()))]
    fn handle(&self, event: &DomainEvent, ctx: &mut HandlerContext<'_>) -> Result<()> {
        let DomainEvent::StreakLogCreated(log) = event else {
            return Ok(());
        };

        let length = streak::consecutive_days_ending(ctx.conn(), log.user_id, log.streak_date)?;
        let already_awarded = ledger::exists(
            ctx.conn(),
            log.user_id,
            ExpEventType::StreakExp,
            RefId::new(log.id),
        )?;

        match accrual::streak_exp(length, log.id, already_awarded, ctx.config()) {
            Some(award) => {
                ctx.append_award(log.user_id, award)?;
            }
            None => debug!(streak_days = length, "no streak bonus"),
        }
        Ok(())
    }
}

/// Compacts the user's ledger after every append.
pub struct SnapshotHandler;

impl Handler for SnapshotHandler {
    fn name(&self) -> &'static str {
        "Snapshot"
    }

    fn handle(&self, event: &DomainEvent, ctx: &mut HandlerContext<'_>) -> Result<()> {
        let DomainEvent::UserExpCreated(xp_event) = event else {
            return Ok(());
        };
        let outcome = snapshot::maybe_compact(
            ctx.conn(),
            xp_event.user_id,
            xp_event.id,
            ctx.config().snapshot_event_interval,
            ctx.now(),
        )?;
        if let snapshot::CompactOutcome::Created(s) = outcome {
            ctx.outcome_mut().snapshots.push(s);
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::schema::Database;
    use crate::types::{ReadingReport, ReadingResource, Xp};

    fn report(id: i64, page: u32) -> DomainEvent {
        DomainEvent::ReadingReportCreated(ReadingReport {
            id,
            user_id: UserId::new(1),
            current_page: page,
            resource: ReadingResource {
                id: 1,
                total_pages: 100,
                isbn: None,
            },
        })
    }

    #[test]
    fn test_default_registration_order() {
        let registry = default_registry();
        assert_eq!(
            registry.handler_names(DomainEventKind::ReadingReportCreated),
            vec!["ReadingExp", "BookCompletion", "StreakFromReadingReport"]
        );
        assert_eq!(
            registry.handler_names(DomainEventKind::QuizAnswered),
            vec!["DailyReadsExp", "StreakFromQuizAnswer"]
        );
        assert_eq!(registry.handler_names(DomainEventKind::StreakLogCreated), vec!["StreakExp"]);
        assert_eq!(registry.handler_names(DomainEventKind::UserExpCreated), vec!["Snapshot"]);
    }

    #[test]
    fn test_single_pass_raises_but_does_not_redispatch() {
        let db = Database::open_in_memory().unwrap();
        let config = XpConfig::default();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap();
        let mut ctx = HandlerContext::new(db.connection(), &config, now, now.date_naive());

        default_registry().dispatch(&report(1, 100), &mut ctx).unwrap();

        let raised = ctx.take_raised();
        let kinds: Vec<_> = raised.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                DomainEventKind::UserExpCreated,
                DomainEventKind::UserExpCreated,
                DomainEventKind::StreakLogCreated,
            ]
        );

        let outcome = ctx.into_outcome();
        let amounts: Vec<_> = outcome.awards.iter().map(|e| (e.event_type, e.amount)).collect();
        assert_eq!(
            amounts,
            vec![
                (ExpEventType::ReadingExp, Xp::from_whole(10)),
                (ExpEventType::BookCompleted, Xp::from_whole(3)),
            ]
        );
        assert_eq!(outcome.streak_logs.len(), 1);
        assert!(outcome.snapshots.is_empty(), "snapshot handler runs next pass");
    }

    struct Failing;

    impl Handler for Failing {
        fn name(&self) -> &'static str {
            "Failing"
        }

        fn handle(&self, _event: &DomainEvent, _ctx: &mut HandlerContext<'_>) -> Result<()> {
            Err(crate::Error::Schema("boom".into()))
        }
    }

    #[test]
    fn test_handler_error_stops_the_pass() {
        let db = Database::open_in_memory().unwrap();
        let config = XpConfig::default();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap();
        let mut ctx = HandlerContext::new(db.connection(), &config, now, now.date_naive());

        let mut registry = HandlerRegistry::new();
        registry
            .register(DomainEventKind::ReadingReportCreated, Failing)
            .register(DomainEventKind::ReadingReportCreated, ReadingExpHandler);

        assert!(registry.dispatch(&report(1, 10), &mut ctx).is_err());
        assert!(ctx.into_outcome().awards.is_empty());
    }

    #[test]
    fn test_unregistered_kind_is_a_no_op() {
        let db = Database::open_in_memory().unwrap();
        let config = XpConfig::default();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap();
        let mut ctx = HandlerContext::new(db.connection(), &config, now, now.date_naive());

        HandlerRegistry::new().dispatch(&report(1, 10), &mut ctx).unwrap();
        assert!(ctx.take_raised().is_empty());
    }
}
