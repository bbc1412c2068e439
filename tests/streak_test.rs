//! Streak Tests
//!
//! - One log per user per calendar day, however many qualifying actions
//! - Streaks count consecutive days and reset after a gap
//! - StreakExp is paid on day 7 and day 14, never in between
//! - Days follow the users' UTC+8 calendar, not UTC

mod common;

use chrono::{NaiveDate, TimeZone, Utc};
use sigma_xp::{ExpEventType, UserId, Xp};
use tokio_util::sync::CancellationToken;

fn read_on_consecutive_days(store: &mut sigma_xp::XpStore, clock: &sigma_xp::MutableClock, days: i64) {
    let cancel = CancellationToken::new();
    for day in 0..days {
        store
            .submit(common::report(day + 1, 1, 1, 500), &cancel)
            .unwrap();
        clock.advance_days(1);
    }
}

fn read_on_consecutive_days_from(
    store: &mut sigma_xp::XpStore,
    clock: &sigma_xp::MutableClock,
    first_day: i64,
    last_day: i64,
) {
    let cancel = CancellationToken::new();
    for day in first_day..=last_day {
        store.submit(common::report(day, 1, 1, 500), &cancel).unwrap();
        clock.advance_days(1);
    }
}

#[test]
fn many_actions_one_day_one_log() {
    let (mut store, _clock) = common::store();
    let cancel = CancellationToken::new();

    let first = store.submit(common::report(1, 1, 5, 500), &cancel).unwrap();
    let second = store.submit(common::report(2, 1, 9, 500), &cancel).unwrap();
    let third = store.submit(common::passing_quiz(1, 1), &cancel).unwrap();

    assert_eq!(first.streak_logs.len(), 1);
    assert!(second.streak_logs.is_empty());
    assert!(third.streak_logs.is_empty());
    assert_eq!(store.streak_summary(UserId::new(1)).unwrap().current_streak_days, 1);
}

#[test]
fn bonus_on_day_seven_and_fourteen_only() {
    let (mut store, clock) = common::store();

    read_on_consecutive_days(&mut store, &clock, 6);
    assert!(common::events_of(&store, 1, ExpEventType::StreakExp).is_empty());

    read_on_consecutive_days_from(&mut store, &clock, 7, 7);
    let bonuses = common::events_of(&store, 1, ExpEventType::StreakExp);
    assert_eq!(bonuses.len(), 1);
    assert_eq!(bonuses[0].amount, Xp::from_whole(10));

    read_on_consecutive_days_from(&mut store, &clock, 8, 13);
    assert_eq!(common::events_of(&store, 1, ExpEventType::StreakExp).len(), 1);

    read_on_consecutive_days_from(&mut store, &clock, 14, 14);
    assert_eq!(common::events_of(&store, 1, ExpEventType::StreakExp).len(), 2);
}

#[test]
fn gap_resets_streak() {
    let (mut store, clock) = common::store();
    let cancel = CancellationToken::new();

    read_on_consecutive_days(&mut store, &clock, 3);
    // Clock is now on day 4, which is skipped.
    clock.advance_days(1);
    store.submit(common::report(10, 1, 1, 500), &cancel).unwrap();

    let summary = store.streak_summary(UserId::new(1)).unwrap();
    assert_eq!(summary.current_streak_days, 1);

    // Five more days: nine logs in total, longest run six.
    clock.advance_days(1);
    read_on_consecutive_days_from(&mut store, &clock, 11, 15);
    assert!(common::events_of(&store, 1, ExpEventType::StreakExp).is_empty());
}

#[test]
fn streak_still_alive_until_day_ends() {
    let (mut store, clock) = common::store();
    read_on_consecutive_days(&mut store, &clock, 3);

    // Today (day 4) has no log yet; yesterday's run still counts.
    assert_eq!(store.streak_summary(UserId::new(1)).unwrap().current_streak_days, 3);

    clock.advance_days(1);
    assert_eq!(store.streak_summary(UserId::new(1)).unwrap().current_streak_days, 0);
}

#[test]
fn local_midnight_splits_days() {
    let (mut store, clock) = common::store();
    let cancel = CancellationToken::new();

    // 23:59 and 00:01 local time on consecutive UTC+8 days, same UTC date.
    clock.set(Utc.with_ymd_and_hms(2026, 3, 2, 15, 59, 0).unwrap());
    let before = store.submit(common::report(1, 1, 1, 500), &cancel).unwrap();
    clock.set(Utc.with_ymd_and_hms(2026, 3, 2, 16, 1, 0).unwrap());
    let after = store.submit(common::report(2, 1, 2, 500), &cancel).unwrap();

    assert_eq!(
        before.streak_logs[0].streak_date,
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    );
    assert_eq!(
        after.streak_logs[0].streak_date,
        NaiveDate::from_ymd_opt(2026, 3, 3).unwrap()
    );
    assert_eq!(store.streak_summary(UserId::new(1)).unwrap().current_streak_days, 2);
}

#[test]
fn weekly_status_strip() {
    let (mut store, clock) = common::store();
    let cancel = CancellationToken::new();

    // Monday and Wednesday.
    store.submit(common::report(1, 1, 1, 500), &cancel).unwrap();
    clock.advance_days(2);
    store.submit(common::report(2, 1, 2, 500), &cancel).unwrap();

    let week = store.streak_summary(UserId::new(1)).unwrap().weekly_status;
    let flags: Vec<Option<bool>> = week.iter().map(|d| d.has_streak).collect();
    assert_eq!(
        flags,
        vec![Some(true), Some(false), Some(true), None, None, None, None]
    );
}
