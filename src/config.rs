//! # Accrual Configuration
//!
//! The constants that shape XP accrual, gathered into one [`XpConfig`] value
//! that is passed explicitly to every component that needs it.
//!
//! ## Environment Overrides
//!
//! [`XpConfig::from_env`] loads [`XpSettings`] through OrthoConfig with the
//! `SIGMA_XP` prefix, then lays every field that is set over the defaults:
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `SIGMA_XP_SNAPSHOT_EVENT_INTERVAL` | `snapshot_event_interval` | 7 |
//! | `SIGMA_XP_STREAK_BONUS_DAYS` | `streak_bonus_days` | 7 |
//! | `SIGMA_XP_STREAK_BONUS` | `streak_bonus` | 10 |
//! | `SIGMA_XP_READING_PER_PAGE` | `reading_per_page` | 0.1 |
//! | `SIGMA_XP_BOOK_COMPLETED` | `book_completed` | 3 |
//! | `SIGMA_XP_BOOK_COMPLETION_COOLDOWN_DAYS` | `book_completion_cooldown_days` | 7 |
//! | `SIGMA_XP_UTC_OFFSET_MINUTES` | `utc_offset_minutes` | 480 |
//! | `SIGMA_XP_MAX_DISPATCH_PASSES` | `max_dispatch_passes` | 8 |
//!
//! [`XpConfig::validate`] runs after loading, so a zero interval or an
//! impossible offset never reaches the engine.

use std::ffi::OsString;

use chrono::FixedOffset;
use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::Xp;

/// Tunable constants of the accrual subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XpConfig {
    /// Unsnapshotted events that trigger a compaction.
    pub snapshot_event_interval: u32,
    /// Streak length multiple that earns a bonus.
    pub streak_bonus_days: u32,
    /// Bonus granted at each streak multiple.
    pub streak_bonus: Xp,
    /// XP per page of a reading report.
    pub reading_per_page: Xp,
    /// XP for finishing a non-recommended book.
    pub book_completed: Xp,
    /// Minimum days between two BookCompleted awards of one user.
    pub book_completion_cooldown_days: u32,
    /// Offset of the users' local calendar from UTC.
    pub utc_offset_minutes: i32,
    /// Upper bound on dispatch passes per unit of work.
    pub max_dispatch_passes: usize,
}

impl Default for XpConfig {
    fn default() -> Self {
        Self {
            snapshot_event_interval: 7,
            streak_bonus_days: 7,
            streak_bonus: Xp::from_whole(10),
            reading_per_page: Xp::from_hundredths(10),
            book_completed: Xp::from_whole(3),
            book_completion_cooldown_days: 7,
            utc_offset_minutes: 8 * 60,
            max_dispatch_passes: 8,
        }
    }
}

impl XpConfig {
    /// Builds a configuration from `SIGMA_XP_*` environment variables.
    ///
    /// # Errors
    ///
    /// `Error::Config` if a variable is set but does not parse, or if the
    /// resulting configuration fails [`XpConfig::validate`].
    pub fn from_env() -> Result<Self> {
        let settings = XpSettings::load_from_iter([OsString::from("sigma-xp")])
            .map_err(|e| Error::Config(e.to_string()))?;
        settings.into_config()
    }

    /// Rejects values that would make the subsystem misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.snapshot_event_interval == 0 {
            return Err(Error::Config("snapshot_event_interval must be at least 1".into()));
        }
        if self.streak_bonus_days == 0 {
            return Err(Error::Config("streak_bonus_days must be at least 1".into()));
        }
        if self.max_dispatch_passes == 0 {
            return Err(Error::Config("max_dispatch_passes must be at least 1".into()));
        }
        self.user_offset()?;
        Ok(())
    }

    /// Returns the users' calendar offset as a chrono offset.
    pub fn user_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            Error::Config(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }
}

/// Optional overrides for [`XpConfig`], one per field.
///
/// Amounts are given in points and may carry two decimals.
#[derive(Debug, Clone, Default, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "SIGMA_XP")]
pub struct XpSettings {
    /// Overrides `snapshot_event_interval`.
    pub snapshot_event_interval: Option<u32>,
    /// Overrides `streak_bonus_days`.
    pub streak_bonus_days: Option<u32>,
    /// Overrides `streak_bonus`, in points.
    pub streak_bonus: Option<f64>,
    /// Overrides `reading_per_page`, in points.
    pub reading_per_page: Option<f64>,
    /// Overrides `book_completed`, in points.
    pub book_completed: Option<f64>,
    /// Overrides `book_completion_cooldown_days`.
    pub book_completion_cooldown_days: Option<u32>,
    /// Overrides `utc_offset_minutes`.
    pub utc_offset_minutes: Option<i32>,
    /// Overrides `max_dispatch_passes`.
    pub max_dispatch_passes: Option<usize>,
}

impl XpSettings {
    /// Lays the set fields over [`XpConfig::default`] and validates the result.
    pub fn into_config(self) -> Result<XpConfig> {
        let defaults = XpConfig::default();
        let config = XpConfig {
            snapshot_event_interval: self
                .snapshot_event_interval
                .unwrap_or(defaults.snapshot_event_interval),
            streak_bonus_days: self.streak_bonus_days.unwrap_or(defaults.streak_bonus_days),
            streak_bonus: points_or("streak_bonus", self.streak_bonus, defaults.streak_bonus)?,
            reading_per_page: points_or(
                "reading_per_page",
                self.reading_per_page,
                defaults.reading_per_page,
            )?,
            book_completed: points_or(
                "book_completed",
                self.book_completed,
                defaults.book_completed,
            )?,
            book_completion_cooldown_days: self
                .book_completion_cooldown_days
                .unwrap_or(defaults.book_completion_cooldown_days),
            utc_offset_minutes: self.utc_offset_minutes.unwrap_or(defaults.utc_offset_minutes),
            max_dispatch_passes: self
                .max_dispatch_passes
                .unwrap_or(defaults.max_dispatch_passes),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Converts a point amount to [`Xp`], rejecting sub-hundredth precision.
fn points_or(field: &str, points: Option<f64>, default: Xp) -> Result<Xp> {
    let Some(points) = points else {
        return Ok(default);
    };
    let hundredths = (points * 100.0).round();
    if !hundredths.is_finite()
        || hundredths.abs() > i64::MAX as f64 / 2.0
        || ((points * 100.0) - hundredths).abs() > 1e-6
    {
        return Err(Error::Config(format!("{field}={points}: not an XP amount")));
    }
    Ok(Xp::from_hundredths(hundredths as i64))
}

#[cfg(test)]
mod tests {
    use env_lock::lock_env;

    use super::*;

    const VARS: [&str; 8] = [
        "SIGMA_XP_SNAPSHOT_EVENT_INTERVAL",
        "SIGMA_XP_STREAK_BONUS_DAYS",
        "SIGMA_XP_STREAK_BONUS",
        "SIGMA_XP_READING_PER_PAGE",
        "SIGMA_XP_BOOK_COMPLETED",
        "SIGMA_XP_BOOK_COMPLETION_COOLDOWN_DAYS",
        "SIGMA_XP_UTC_OFFSET_MINUTES",
        "SIGMA_XP_MAX_DISPATCH_PASSES",
    ];

    /// Every variable unset except the given ones.
    fn env_with(set: &[(&str, &str)]) -> Vec<(&'static str, Option<String>)> {
        VARS.iter()
            .map(|&var| {
                let value = set
                    .iter()
                    .find(|(k, _)| *k == var)
                    .map(|(_, v)| v.to_string());
                (var, value)
            })
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = XpConfig::default();
        assert_eq!(config.snapshot_event_interval, 7);
        assert_eq!(config.streak_bonus, Xp::from_whole(10));
        assert_eq!(config.reading_per_page.to_string(), "0.10");
        assert_eq!(config.book_completed, Xp::from_whole(3));
        assert_eq!(config.user_offset().unwrap().local_minus_utc(), 8 * 3600);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_settings_yield_defaults() {
        let config = XpSettings::default().into_config().unwrap();
        assert_eq!(config, XpConfig::default());
    }

    #[test]
    fn test_settings_override_defaults() {
        let config = XpSettings {
            snapshot_event_interval: Some(3),
            reading_per_page: Some(0.25),
            utc_offset_minutes: Some(-300),
            ..XpSettings::default()
        }
        .into_config()
        .unwrap();

        assert_eq!(config.snapshot_event_interval, 3);
        assert_eq!(config.reading_per_page, Xp::from_hundredths(25));
        assert_eq!(config.utc_offset_minutes, -300);
        assert_eq!(config.streak_bonus_days, 7);
    }

    #[test]
    fn test_sub_hundredth_amount_is_rejected() {
        let err = XpSettings {
            streak_bonus: Some(0.125),
            ..XpSettings::default()
        }
        .into_config()
        .unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("streak_bonus")));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let err = XpSettings {
            snapshot_event_interval: Some(0),
            ..XpSettings::default()
        }
        .into_config()
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_offset_out_of_range_is_rejected() {
        let err = XpSettings {
            utc_offset_minutes: Some(100_000),
            ..XpSettings::default()
        }
        .into_config()
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_env_without_variables() {
        let _guard = lock_env(env_with(&[]));
        assert_eq!(XpConfig::from_env().unwrap(), XpConfig::default());
    }

    #[test]
    fn test_from_env_reads_prefixed_variables() {
        let _guard = lock_env(env_with(&[
            ("SIGMA_XP_SNAPSHOT_EVENT_INTERVAL", "5"),
            ("SIGMA_XP_BOOK_COMPLETED", "4.5"),
            ("SIGMA_XP_MAX_DISPATCH_PASSES", "2"),
        ]));

        let config = XpConfig::from_env().unwrap();
        assert_eq!(config.snapshot_event_interval, 5);
        assert_eq!(config.book_completed, Xp::from_hundredths(450));
        assert_eq!(config.max_dispatch_passes, 2);
        assert_eq!(config.streak_bonus, Xp::from_whole(10));
    }

    #[test]
    fn test_from_env_validates_after_loading() {
        let _guard = lock_env(env_with(&[("SIGMA_XP_STREAK_BONUS_DAYS", "0")]));
        assert!(matches!(XpConfig::from_env(), Err(Error::Config(_))));
    }
}
