#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use sigma_xp::{
    Award, DailyRead, ExpEventType, MutableClock, QuizAnswer, QuizAnswered, QuizQuestion,
    ReadingReport, ReadingResource, RefId, Trigger, UserId, Xp, XpConfig, XpEvent, XpStore,
};

/// Monday 2026-03-02, 10:00 in the users' UTC+8 calendar.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap()
}

pub fn clock() -> Arc<MutableClock> {
    Arc::new(MutableClock::new(start_time()))
}

pub fn store() -> (XpStore, Arc<MutableClock>) {
    store_with(XpConfig::default())
}

pub fn store_with(config: XpConfig) -> (XpStore, Arc<MutableClock>) {
    let clock = clock();
    let store = XpStore::open_in_memory(config, clock.clone()).expect("open store");
    (store, clock)
}

pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    (dir, path)
}

pub fn report(id: i64, user: i64, page: u32, total_pages: u32) -> Trigger {
    Trigger::ReadingReportCreated(ReadingReport {
        id,
        user_id: UserId::new(user),
        current_page: page,
        resource: ReadingResource {
            id: 1,
            total_pages,
            isbn: None,
        },
    })
}

pub fn report_with_isbn(id: i64, user: i64, page: u32, total_pages: u32, isbn: &str) -> Trigger {
    Trigger::ReadingReportCreated(ReadingReport {
        id,
        user_id: UserId::new(user),
        current_page: page,
        resource: ReadingResource {
            id: 2,
            total_pages,
            isbn: Some(isbn.to_string()),
        },
    })
}

/// A two-question quiz ("A", "B") needing `minimal` correct answers.
pub fn quiz(
    user: i64,
    daily_read_id: i64,
    minimal: u32,
    answers: &[(u32, u32, &str)],
) -> Trigger {
    Trigger::QuizAnswered(QuizAnswered {
        user_id: UserId::new(user),
        daily_read: DailyRead {
            id: daily_read_id,
            exp: Xp::from_whole(15),
            minimal_correct_answer: minimal,
        },
        questions: vec![
            QuizQuestion {
                question_seq: 1,
                correct_answer: "A".to_string(),
            },
            QuizQuestion {
                question_seq: 2,
                correct_answer: "B".to_string(),
            },
        ],
        answers: answers
            .iter()
            .map(|(question_seq, retry_seq, answer)| QuizAnswer {
                question_seq: *question_seq,
                retry_seq: *retry_seq,
                answer: answer.to_string(),
            })
            .collect(),
    })
}

pub fn passing_quiz(user: i64, daily_read_id: i64) -> Trigger {
    quiz(user, daily_read_id, 2, &[(1, 1, "a"), (2, 1, "b")])
}

pub fn failing_quiz(user: i64, daily_read_id: i64) -> Trigger {
    quiz(user, daily_read_id, 2, &[(1, 1, "a"), (2, 1, "c")])
}

pub fn award(event_type: ExpEventType, whole: i64, ref_id: i64) -> Award {
    Award {
        event_type,
        amount: Xp::from_whole(whole),
        ref_id: RefId::new(ref_id),
    }
}

pub fn events_of(store: &XpStore, user: i64, event_type: ExpEventType) -> Vec<XpEvent> {
    store
        .user_events(UserId::new(user))
        .expect("read events")
        .into_iter()
        .filter(|e| e.event_type == event_type)
        .collect()
}
