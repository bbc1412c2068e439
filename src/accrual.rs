//! # Accrual Rules
//!
//! Pure functions deciding whether an action earns XP, and how much.
//!
//! ## Rust Pattern: Facts In, Decision Out
//!
//! The rules never touch storage. Each handler in [`dispatch`](crate::dispatch)
//! gathers the facts a rule needs (has this key been awarded? when was the
//! last completion bonus?) and passes them in. A rule returns
//! `Some(`[`Award`]`)` or `None`; `None` is a guard no-op, never an error.
//!
//! | Rule | Fires on | Amount | Guard |
//! |------|----------|--------|-------|
//! | [`reading_exp`] | every reading report | `current_page × reading_per_page` | none |
//! | [`daily_reads_exp`] | quiz answered | daily read's `exp` | passed, not yet awarded, `exp ≠ 0` |
//! | [`streak_exp`] | new streak log | `streak_bonus` | length multiple of `streak_bonus_days`, not yet awarded |
//! | [`book_completion`] | report reaching last page | recommendation `exp` or `book_completed` | cooldown for non-recommended |

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::XpConfig;
use crate::types::{DailyRead, ExpEventType, QuizAnswer, QuizQuestion, ReadingReport, RefId, Xp};

/// A decision to append one XP event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Award {
    /// Why.
    pub event_type: ExpEventType,
    /// How much.
    pub amount: Xp,
    /// Which action; with the user and type, the idempotency key.
    pub ref_id: RefId,
}

// =============================================================================
// ReadingExp
// =============================================================================

/// XP for a reading report: the reported page times the per-page rate.
///
/// The amount uses the absolute `current_page`, not the pages added since the
/// previous report. Always fires, zero pages included.
pub fn reading_exp(report: &ReadingReport, config: &XpConfig) -> Award {
    Award {
        event_type: ExpEventType::ReadingExp,
        amount: config.reading_per_page.times(i64::from(report.current_page)),
        ref_id: RefId::new(report.id),
    }
}

// =============================================================================
// DailyReadsExp
// =============================================================================

/// Outcome of grading a quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizScore {
    /// Questions whose latest answer is correct.
    pub correct: u32,
    /// `correct >= minimal_correct_answer`.
    pub passed: bool,
}

/// Grades a quiz using the latest retry of each question.
///
/// Answers compare case-insensitively (Unicode lowercase) without trimming.
/// A question nobody answered is simply not correct; an answer to an unknown
/// question is ignored.
pub fn score_quiz(
    daily_read: &DailyRead,
    questions: &[QuizQuestion],
    answers: &[QuizAnswer],
) -> QuizScore {
    let mut latest: HashMap<u32, &QuizAnswer> = HashMap::new();
    for answer in answers {
        latest
            .entry(answer.question_seq)
            .and_modify(|kept| {
                if answer.retry_seq > kept.retry_seq {
                    *kept = answer;
                }
            })
            .or_insert(answer);
    }

    let correct = questions
        .iter()
        .filter(|q| {
            latest
                .get(&q.question_seq)
                .is_some_and(|a| a.answer.to_lowercase() == q.correct_answer.to_lowercase())
        })
        .count() as u32;

    QuizScore {
        correct,
        passed: correct >= daily_read.minimal_correct_answer,
    }
}

/// XP for passing a daily read's quiz for the first time.
pub fn daily_reads_exp(
    daily_read: &DailyRead,
    score: QuizScore,
    already_awarded: bool,
) -> Option<Award> {
    if !score.passed || already_awarded || daily_read.exp.is_zero() {
        return None;
    }
    Some(Award {
        event_type: ExpEventType::DailyReadsExp,
        amount: daily_read.exp,
        ref_id: RefId::new(daily_read.id),
    })
}

// =============================================================================
// StreakExp
// =============================================================================

/// Bonus for a streak whose length is an exact multiple of the bonus interval.
pub fn streak_exp(
    streak_length: u32,
    streak_log_id: i64,
    already_awarded: bool,
    config: &XpConfig,
) -> Option<Award> {
    if streak_length == 0 || streak_length % config.streak_bonus_days != 0 || already_awarded {
        return None;
    }
    Some(Award {
        event_type: ExpEventType::StreakExp,
        amount: config.streak_bonus,
        ref_id: RefId::new(streak_log_id),
    })
}

// =============================================================================
// BookCompleted / RecommendedBookCompleted
// =============================================================================

/// XP for finishing a book.
///
/// `recommendation` is the catalogue's XP for the resource's ISBN, if listed.
/// Recommended books pay unconditionally. Other books pay only when the
/// user's previous BookCompleted award (any book) is at least the cooldown
/// old.
pub fn book_completion(
    report: &ReadingReport,
    recommendation: Option<Xp>,
    last_book_completed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    config: &XpConfig,
) -> Option<Award> {
    if !report.completes_resource() {
        return None;
    }

    let ref_id = RefId::new(report.id);

    if let Some(amount) = recommendation {
        return Some(Award {
            event_type: ExpEventType::RecommendedBookCompleted,
            amount,
            ref_id,
        });
    }

    let cooldown = TimeDelta::days(i64::from(config.book_completion_cooldown_days));
    let cooled_down = match last_book_completed_at {
        None => true,
        Some(last) => now - last >= cooldown,
    };

    cooled_down.then_some(Award {
        event_type: ExpEventType::BookCompleted,
        amount: config.book_completed,
        ref_id,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::types::{ReadingResource, UserId};

    fn report(current_page: u32, total_pages: u32) -> ReadingReport {
        ReadingReport {
            id: 11,
            user_id: UserId::new(1),
            current_page,
            resource: ReadingResource {
                id: 3,
                total_pages,
                isbn: Some("978-1".into()),
            },
        }
    }

    fn daily_read(exp: Xp, minimal_correct_answer: u32) -> DailyRead {
        DailyRead {
            id: 21,
            exp,
            minimal_correct_answer,
        }
    }

    fn question(seq: u32, answer: &str) -> QuizQuestion {
        QuizQuestion {
            question_seq: seq,
            correct_answer: answer.into(),
        }
    }

    fn answer(seq: u32, retry: u32, text: &str) -> QuizAnswer {
        QuizAnswer {
            question_seq: seq,
            retry_seq: retry,
            answer: text.into(),
        }
    }

    #[test]
    fn test_reading_exp_is_page_times_rate() {
        let config = XpConfig::default();

        let award = reading_exp(&report(50, 200), &config);
        assert_eq!(award.amount, Xp::from_whole(5));
        assert_eq!(award.event_type, ExpEventType::ReadingExp);
        assert_eq!(award.ref_id, RefId::new(11));

        assert_eq!(reading_exp(&report(200, 200), &config).amount, Xp::from_whole(20));
        assert_eq!(reading_exp(&report(7, 200), &config).amount, Xp::from_hundredths(70));
    }

    #[test]
    fn test_score_uses_latest_retry_case_insensitively() {
        let dr = daily_read(Xp::from_whole(5), 2);
        let questions = [question(1, "B"), question(2, "Paris"), question(3, "c")];
        let answers = [
            answer(1, 1, "a"),
            answer(1, 2, "b"),
            answer(2, 2, "london"),
            answer(2, 1, "PARIS"),
            answer(3, 1, " c"),
        ];

        let score = score_quiz(&dr, &questions, &answers);
        assert_eq!(score.correct, 1, "q1 latest is correct; q2 latest is wrong; q3 is not trimmed");
        assert!(!score.passed);
    }

    #[test]
    fn test_daily_reads_guards() {
        let dr = daily_read(Xp::from_whole(5), 1);
        let pass = QuizScore {
            correct: 1,
            passed: true,
        };
        let fail = QuizScore {
            correct: 0,
            passed: false,
        };

        let award = daily_reads_exp(&dr, pass, false).unwrap();
        assert_eq!(award.amount, Xp::from_whole(5));
        assert_eq!(award.ref_id, RefId::new(21));

        assert!(daily_reads_exp(&dr, pass, true).is_none());
        assert!(daily_reads_exp(&dr, fail, false).is_none());
        assert!(daily_reads_exp(&daily_read(Xp::ZERO, 1), pass, false).is_none());
    }

    #[test]
    fn test_streak_bonus_only_on_multiples() {
        let config = XpConfig::default();
        let awarded: Vec<u32> = (1..=21)
            .filter(|len| streak_exp(*len, 1, false, &config).is_some())
            .collect();
        assert_eq!(awarded, vec![7, 14, 21]);

        assert!(streak_exp(14, 1, true, &config).is_none());
        assert_eq!(
            streak_exp(7, 99, false, &config).unwrap().ref_id,
            RefId::new(99)
        );
    }

    #[test]
    fn test_book_completion_requires_last_page() {
        let config = XpConfig::default();
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();

        assert!(book_completion(&report(199, 200), None, None, now, &config).is_none());
        assert!(book_completion(&report(10, 0), None, None, now, &config).is_none());

        let award = book_completion(&report(250, 200), None, None, now, &config).unwrap();
        assert_eq!(award.event_type, ExpEventType::BookCompleted);
        assert_eq!(award.amount, Xp::from_whole(3));
    }

    #[test]
    fn test_book_completion_cooldown() {
        let config = XpConfig::default();
        let last = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let done = report(200, 200);

        let six_days = last + TimeDelta::days(6) + TimeDelta::hours(23);
        assert!(book_completion(&done, None, Some(last), six_days, &config).is_none());

        let seven_days = last + TimeDelta::days(7);
        assert!(book_completion(&done, None, Some(last), seven_days, &config).is_some());
    }

    #[test]
    fn test_recommended_book_ignores_cooldown() {
        let config = XpConfig::default();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        let award = book_completion(
            &report(200, 200),
            Some(Xp::from_hundredths(1250)),
            Some(now),
            now,
            &config,
        )
        .unwrap();
        assert_eq!(award.event_type, ExpEventType::RecommendedBookCompleted);
        assert_eq!(award.amount, Xp::from_hundredths(1250));
    }
}
