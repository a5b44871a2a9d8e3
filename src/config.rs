//! Runtime configuration.
//!
//! Read from the environment (and a `.env` file when present). Every value
//! except the Telegram credentials has a default.

use crate::error::AppError;
use crate::models::task::TaskKind;
use crate::services::notifier::TelegramConfig;
use crate::services::scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// UTC offset of Asia/Tehran in minutes (+03:30, no DST since 2022).
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 210;

/// First hour of the day at which votes may be decided.
pub const DEFAULT_DAYBREAK_HOUR: u32 = 8;

/// Delays between a trigger and the job it schedules, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTimings {
    /// Assignment to automatic release of a review claim.
    pub revoke_review_secs: i64,
    /// Submission to first decision attempt, and between attempts.
    pub check_voice_secs: i64,
    /// Between two vote counter refreshes.
    pub update_votes_secs: i64,
}

impl Default for JobTimings {
    fn default() -> Self {
        Self {
            revoke_review_secs: TaskKind::RevokeReview.default_delay_secs(),
            check_voice_secs: TaskKind::CheckVoice.default_delay_secs(),
            update_votes_secs: TaskKind::UpdateVotes.default_delay_secs(),
        }
    }
}

impl JobTimings {
    /// Delay used when a job of `kind` reschedules itself.
    pub fn delay_for(&self, kind: TaskKind) -> i64 {
        match kind {
            TaskKind::RevokeReview => self.revoke_review_secs,
            TaskKind::CheckVoice => self.check_voice_secs,
            TaskKind::UpdateVotes => self.update_votes_secs,
        }
    }
}

/// Settings the jobs read on every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSettings {
    pub timings: JobTimings,

    /// Offset of the decision time zone from UTC, in minutes.
    pub utc_offset_minutes: i32,

    /// Local hour before which no vote is decided.
    pub daybreak_hour: u32,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            timings: JobTimings::default(),
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            daybreak_hour: DEFAULT_DAYBREAK_HOUR,
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database file.
    pub database_path: PathBuf,

    pub telegram: TelegramConfig,

    pub scheduler: SchedulerConfig,

    pub jobs: JobSettings,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// A `.env` file in the working directory is read first, if present.
    pub fn from_env() -> Result<Self, AppError> {
        if let Ok(path) = dotenvy::dotenv() {
            log::debug!("[config] Loaded {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = lookup("TELEGRAM_BOT_TOKEN")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::config("TELEGRAM_BOT_TOKEN is not set", "TELEGRAM_BOT_TOKEN"))?;

        let chat_id: i64 = lookup("TELEGRAM_CHAT_ID")
            .ok_or_else(|| AppError::config("TELEGRAM_CHAT_ID is not set", "TELEGRAM_CHAT_ID"))
            .and_then(|v| parse_value("TELEGRAM_CHAT_ID", &v))?;

        let telegram_defaults = TelegramConfig::default();
        let scheduler_defaults = SchedulerConfig::default();
        let job_defaults = JobSettings::default();

        let config = Self {
            database_path: lookup("VOICE_REVIEW_DATABASE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("voice-review.db")),
            telegram: TelegramConfig {
                api_url: lookup("TELEGRAM_API_URL").unwrap_or(telegram_defaults.api_url),
                bot_token,
                chat_id,
                timeout_secs: parse_var(
                    &lookup,
                    "TELEGRAM_TIMEOUT_SECS",
                    telegram_defaults.timeout_secs,
                )?,
            },
            scheduler: SchedulerConfig {
                poll_interval_secs: parse_var(
                    &lookup,
                    "VOICE_REVIEW_POLL_INTERVAL_SECS",
                    scheduler_defaults.poll_interval_secs,
                )?,
                workers: parse_var(&lookup, "VOICE_REVIEW_WORKERS", scheduler_defaults.workers)?,
                batch_size: parse_var(
                    &lookup,
                    "VOICE_REVIEW_BATCH_SIZE",
                    scheduler_defaults.batch_size,
                )?,
            },
            jobs: JobSettings {
                timings: JobTimings {
                    revoke_review_secs: parse_var(
                        &lookup,
                        "VOICE_REVIEW_REVOKE_AFTER_SECS",
                        job_defaults.timings.revoke_review_secs,
                    )?,
                    check_voice_secs: parse_var(
                        &lookup,
                        "VOICE_REVIEW_CHECK_INTERVAL_SECS",
                        job_defaults.timings.check_voice_secs,
                    )?,
                    update_votes_secs: parse_var(
                        &lookup,
                        "VOICE_REVIEW_REFRESH_INTERVAL_SECS",
                        job_defaults.timings.update_votes_secs,
                    )?,
                },
                utc_offset_minutes: parse_var(
                    &lookup,
                    "VOICE_REVIEW_UTC_OFFSET_MINUTES",
                    job_defaults.utc_offset_minutes,
                )?,
                daybreak_hour: parse_var(
                    &lookup,
                    "VOICE_REVIEW_DAYBREAK_HOUR",
                    job_defaults.daybreak_hour,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that the types alone do not enforce.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.scheduler.poll_interval_secs == 0 {
            return Err(AppError::config(
                "Poll interval must be at least one second",
                "VOICE_REVIEW_POLL_INTERVAL_SECS",
            ));
        }
        if self.scheduler.workers == 0 {
            return Err(AppError::config("At least one worker is required", "VOICE_REVIEW_WORKERS"));
        }
        if self.scheduler.batch_size <= 0 {
            return Err(AppError::config("Batch size must be positive", "VOICE_REVIEW_BATCH_SIZE"));
        }
        if self.jobs.daybreak_hour > 23 {
            return Err(AppError::config(
                "Daybreak hour must be between 0 and 23",
                "VOICE_REVIEW_DAYBREAK_HOUR",
            ));
        }
        if !(-720..=840).contains(&self.jobs.utc_offset_minutes) {
            return Err(AppError::config(
                "UTC offset must be between -720 and 840 minutes",
                "VOICE_REVIEW_UTC_OFFSET_MINUTES",
            ));
        }

        let timings = &self.jobs.timings;
        for (key, value) in [
            ("VOICE_REVIEW_REVOKE_AFTER_SECS", timings.revoke_review_secs),
            ("VOICE_REVIEW_CHECK_INTERVAL_SECS", timings.check_voice_secs),
            ("VOICE_REVIEW_REFRESH_INTERVAL_SECS", timings.update_votes_secs),
        ] {
            if value <= 0 {
                return Err(AppError::config("Job delays must be positive", key));
            }
        }

        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::config(format!("Invalid value for {}: {:?}", key, raw), key))
}
