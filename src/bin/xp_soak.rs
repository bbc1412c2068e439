//! XP ledger soak test.
//!
//! Drives many simulated readers through many days of reading reports and
//! quizzes, then checks the ledger's invariants on the resulting database.
//! Exits non-zero if any check fails.
//!
//! ```bash
//! # Default: 50 users over 30 days in a temp file
//! cargo run --release --bin xp-soak
//!
//! # Bigger run against a kept file, with per-unit logs
//! RUST_LOG=sigma_xp=debug cargo run --release --bin xp-soak -- --users 500 --days 90 --db soak.db
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use chrono::{TimeZone, Utc};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sigma_xp::{
    DailyRead, MutableClock, QuizAnswer, QuizAnswered, QuizQuestion, ReadingReport,
    ReadingResource, SigmaXp, Trigger, UserId, Xp, XpConfig,
};

#[derive(Parser, Debug)]
#[command(name = "xp-soak", about = "Soak test for the XP ledger")]
struct Args {
    /// Number of simulated users
    #[arg(short, long, default_value_t = 50)]
    users: u32,

    /// Number of simulated days
    #[arg(short, long, default_value_t = 30)]
    days: u32,

    /// Database path (default: temp file)
    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> sigma_xp::Result<ExitCode> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let users = i64::from(args.users);
    let days = i64::from(args.days);
    let config = XpConfig::from_env()?;

    let temp_dir = tempfile::tempdir()
        .map_err(|e| sigma_xp::Error::Config(format!("failed to create temp dir: {e}")))?;
    let db_path = args
        .db
        .clone()
        .unwrap_or_else(|| temp_dir.path().join("soak.db"));

    info!(users = args.users, days = args.days, db = %db_path.display(), "starting soak");

    let clock = Arc::new(MutableClock::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0)
            .single()
            .unwrap_or_else(Utc::now),
    ));
    let xp = SigmaXp::open(&db_path, config, clock.clone()).await?;

    let start = Instant::now();
    let mut units = 0u64;
    let mut failures = 0u64;

    for day in 0..days {
        let mut tasks = Vec::with_capacity(args.users as usize * 2);
        for user in 1..=users {
            for trigger in [reading_report(day, user, users), quiz(day, user)] {
                let xp = xp.clone();
                tasks.push(tokio::spawn(async move {
                    xp.submit(trigger, CancellationToken::new()).await
                }));
            }
        }

        for task in tasks {
            units += 1;
            match task.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    error!(error = %e, day, "unit failed");
                }
                Err(e) => {
                    failures += 1;
                    error!(error = %e, day, "task panicked");
                }
            }
        }

        clock.advance_days(1);
    }

    let elapsed = start.elapsed();
    info!(
        units,
        failures,
        elapsed_ms = elapsed.as_millis() as u64,
        units_per_sec = units as f64 / elapsed.as_secs_f64(),
        "load finished"
    );

    let mut violations = 0u64;
    for user in 1..=users {
        violations += verify_user(&xp, UserId::new(user), days).await?;
    }
    xp.shutdown().await;

    if failures == 0 && violations == 0 {
        info!("all invariants hold");
        Ok(ExitCode::SUCCESS)
    } else {
        error!(failures, violations, "soak failed");
        Ok(ExitCode::FAILURE)
    }
}

/// A report advancing 20 pages a day through a 300-page book.
fn reading_report(day: i64, user: i64, users: i64) -> Trigger {
    Trigger::ReadingReportCreated(ReadingReport {
        id: day * users + user,
        user_id: UserId::new(user),
        current_page: ((day + 1) * 20).min(300) as u32,
        resource: ReadingResource {
            id: 1,
            total_pages: 300,
            isbn: None,
        },
    })
}

/// A passing quiz on the day's daily read.
fn quiz(day: i64, user: i64) -> Trigger {
    Trigger::QuizAnswered(QuizAnswered {
        user_id: UserId::new(user),
        daily_read: DailyRead {
            id: day + 1,
            exp: Xp::from_whole(5),
            minimal_correct_answer: 1,
        },
        questions: vec![QuizQuestion {
            question_seq: 1,
            correct_answer: "B".to_string(),
        }],
        answers: vec![QuizAnswer {
            question_seq: 1,
            retry_seq: 1,
            answer: "b".to_string(),
        }],
    })
}

/// Counts invariant violations for one user.
async fn verify_user(xp: &SigmaXp, user_id: UserId, days: i64) -> sigma_xp::Result<u64> {
    let mut violations = 0;
    let events = xp.user_events(user_id).await?;
    let snapshots = xp.user_snapshots(user_id).await?;

    let total: Xp = events.iter().map(|e| e.amount).sum();
    let accumulated = xp.accumulated_exp(user_id).await?;
    if accumulated != total.truncate() {
        error!(%user_id, accumulated, ledger = %total, "balance differs from ledger sum");
        violations += 1;
    }

    for (i, snapshot) in snapshots.iter().enumerate() {
        let expected_seq = i as u64 + 1;
        if snapshot.snapshot_seq.as_raw() != expected_seq {
            error!(%user_id, expected_seq, got = snapshot.snapshot_seq.as_raw(), "snapshot gap");
            violations += 1;
        }

        let folded: Xp = events
            .iter()
            .filter(|e| e.id <= snapshot.last_event_id)
            .map(|e| e.amount)
            .sum();
        if folded != snapshot.exp {
            error!(%user_id, seq = expected_seq, snapshot = %snapshot.exp, ledger = %folded, "snapshot differs from ledger prefix");
            violations += 1;
        }
    }

    let streak = xp.streak_summary(user_id).await?;
    // Today is the day after the last simulated one and not yet logged.
    if i64::from(streak.current_streak_days) != days {
        error!(%user_id, streak = streak.current_streak_days, days, "streak length mismatch");
        violations += 1;
    }

    Ok(violations)
}
