//! # Domain Events
//!
//! The typed notifications the dispatcher fans out to handlers.
//!
//! ```text
//!   collaborators                     core
//!   ─────────────                     ────
//!   ReadingReportCreated ──┐
//!   QuizAnswered ──────────┼──► dispatch ──► handlers ──┬─► StreakLogCreated ─┐
//!                          │                            └─► UserExpCreated ───┤
//!                          └──────────────── next pass ◄─────────────────────┘
//! ```
//!
//! Collaborators may only start a unit of work with a [`Trigger`]. The other
//! two variants are raised by the core itself when it inserts a streak log or
//! appends an XP event.

use std::fmt;

use crate::types::{DailyRead, QuizAnswer, QuizQuestion, ReadingReport, StreakLog, UserId, XpEvent};

/// A user answered (or re-answered) the quiz of a daily read.
///
/// Carries every answer the user has submitted so far; scoring keeps only the
/// latest retry per question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizAnswered {
    /// Who answered.
    pub user_id: UserId,
    /// The daily read the quiz belongs to.
    pub daily_read: DailyRead,
    /// The quiz's questions with their expected answers.
    pub questions: Vec<QuizQuestion>,
    /// All submitted answers, retries included.
    pub answers: Vec<QuizAnswer>,
}

/// An action persisted by a collaborator that may earn XP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// A reading report was filed.
    ReadingReportCreated(ReadingReport),
    /// A daily-read quiz was answered.
    QuizAnswered(QuizAnswered),
}

impl Trigger {
    /// The user the trigger belongs to.
    pub fn user_id(&self) -> UserId {
        match self {
            Trigger::ReadingReportCreated(report) => report.user_id,
            Trigger::QuizAnswered(quiz) => quiz.user_id,
        }
    }
}

/// Every event the dispatcher knows how to route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// See [`Trigger::ReadingReportCreated`].
    ReadingReportCreated(ReadingReport),
    /// See [`Trigger::QuizAnswered`].
    QuizAnswered(QuizAnswered),
    /// The core inserted a streak log for a new qualifying day.
    StreakLogCreated(StreakLog),
    /// The core appended an XP event.
    UserExpCreated(XpEvent),
}

impl DomainEvent {
    /// The routing tag of this event.
    pub fn kind(&self) -> DomainEventKind {
        match self {
            DomainEvent::ReadingReportCreated(_) => DomainEventKind::ReadingReportCreated,
            DomainEvent::QuizAnswered(_) => DomainEventKind::QuizAnswered,
            DomainEvent::StreakLogCreated(_) => DomainEventKind::StreakLogCreated,
            DomainEvent::UserExpCreated(_) => DomainEventKind::UserExpCreated,
        }
    }

    /// The user this event concerns.
    pub fn user_id(&self) -> UserId {
        match self {
            DomainEvent::ReadingReportCreated(report) => report.user_id,
            DomainEvent::QuizAnswered(quiz) => quiz.user_id,
            DomainEvent::StreakLogCreated(log) => log.user_id,
            DomainEvent::UserExpCreated(event) => event.user_id,
        }
    }
}

impl From<Trigger> for DomainEvent {
    fn from(trigger: Trigger) -> Self {
        match trigger {
            Trigger::ReadingReportCreated(report) => DomainEvent::ReadingReportCreated(report),
            Trigger::QuizAnswered(quiz) => DomainEvent::QuizAnswered(quiz),
        }
    }
}

/// Routing tag of a [`DomainEvent`]; the key of the handler registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DomainEventKind {
    /// Tag of [`DomainEvent::ReadingReportCreated`].
    ReadingReportCreated,
    /// Tag of [`DomainEvent::QuizAnswered`].
    QuizAnswered,
    /// Tag of [`DomainEvent::StreakLogCreated`].
    StreakLogCreated,
    /// Tag of [`DomainEvent::UserExpCreated`].
    UserExpCreated,
}

impl DomainEventKind {
    /// Returns the event name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainEventKind::ReadingReportCreated => "ReadingReportCreated",
            DomainEventKind::QuizAnswered => "QuizAnswered",
            DomainEventKind::StreakLogCreated => "StreakLogCreated",
            DomainEventKind::UserExpCreated => "UserExpCreated",
        }
    }
}

impl fmt::Display for DomainEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ReadingResource, Xp};

    #[test]
    fn test_trigger_converts_to_matching_kind() {
        let report = ReadingReport {
            id: 5,
            user_id: UserId::new(3),
            current_page: 10,
            resource: ReadingResource {
                id: 1,
                total_pages: 100,
                isbn: None,
            },
        };
        let trigger = Trigger::ReadingReportCreated(report);
        assert_eq!(trigger.user_id(), UserId::new(3));

        let event: DomainEvent = trigger.into();
        assert_eq!(event.kind(), DomainEventKind::ReadingReportCreated);
        assert_eq!(event.user_id(), UserId::new(3));

        let quiz = Trigger::QuizAnswered(QuizAnswered {
            user_id: UserId::new(4),
            daily_read: DailyRead {
                id: 1,
                exp: Xp::from_whole(5),
                minimal_correct_answer: 1,
            },
            questions: vec![],
            answers: vec![],
        });
        assert_eq!(DomainEvent::from(quiz).kind(), DomainEventKind::QuizAnswered);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(DomainEventKind::UserExpCreated.to_string(), "UserExpCreated");
    }
}
