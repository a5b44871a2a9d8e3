//! Scheduled task and completed task models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Background job a scheduled task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Release an admin's review claim after a timeout.
    RevokeReview,
    /// Tally the votes of a voice and finalize it.
    CheckVoice,
    /// Re-render the vote counter of a voice.
    UpdateVotes,
}

impl TaskKind {
    /// Default delay before a task of this kind runs, in seconds.
    pub fn default_delay_secs(&self) -> i64 {
        match self {
            Self::RevokeReview | Self::CheckVoice => 21_600,
            Self::UpdateVotes => 180,
        }
    }

    /// Parse a stored task name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "revoke_review" => Some(Self::RevokeReview),
            "check_voice" => Some(Self::CheckVoice),
            "update_votes" => Some(Self::UpdateVotes),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RevokeReview => write!(f, "revoke_review"),
            Self::CheckVoice => write!(f, "check_voice"),
            Self::UpdateVotes => write!(f, "update_votes"),
        }
    }
}

/// A job invocation waiting in the queue.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScheduledTask {
    /// Task ID.
    pub id: i64,

    /// Job name: `revoke_review`, `check_voice`, `update_votes`.
    pub task_name: String,

    /// Voice the job runs against.
    pub voice_id: i64,

    /// Earliest time the task may run (Unix).
    pub run_at: i64,

    /// Number of failed runs so far.
    pub attempts: i64,

    /// Last error message (optional).
    pub last_error: Option<String>,

    /// When a worker claimed the task (Unix, optional).
    pub locked_at: Option<i64>,

    /// When the task was queued (Unix).
    pub created_at: i64,
}

impl ScheduledTask {
    /// Attempts after which a task is given up and logged as failed.
    pub const MAX_ATTEMPTS: i64 = 25;

    /// Seconds after which a claim is considered abandoned.
    pub const MAX_RUN_TIME_SECS: i64 = 3600;

    /// Parse the task name into an enum.
    pub fn kind(&self) -> Option<TaskKind> {
        TaskKind::from_name(&self.task_name)
    }

    /// Check if the task is claimed by a live worker at `now`.
    pub fn is_locked(&self, now: i64) -> bool {
        self.locked_at
            .is_some_and(|locked| now - locked < Self::MAX_RUN_TIME_SECS)
    }

    /// Delay before the next run after `attempts` failures.
    pub fn backoff_secs(attempts: i64) -> i64 {
        attempts.pow(4) + 5
    }
}

/// Log entry for a task that finished, successfully or not.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CompletedTask {
    /// Log entry ID.
    pub id: i64,

    /// Job name.
    pub task_name: String,

    /// Voice the job ran against.
    pub voice_id: i64,

    /// Scheduled run time (Unix).
    pub run_at: i64,

    /// Failed runs before completion.
    pub attempts: i64,

    /// Last error message (optional).
    pub last_error: Option<String>,

    /// Whether the task was given up after too many failures.
    pub failed: bool,

    /// When the task left the queue (Unix).
    pub completed_at: i64,
}
