//! The vote jobs.
//!
//! Each job is one short run against one voice. A job that has to try again
//! later queues a fresh task for the same voice instead of recursing, so an
//! open-ended polling loop is a chain of independent queue entries.
//!
//! A voice that vanished or already left `pending` turns every job into a
//! silent no-op.

use crate::config::JobSettings;
use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::task::{ScheduledTask, TaskKind};
use crate::models::voice::VoteKind;
use crate::services::clock::Clock;
use crate::services::notifier::Notifier;
use crate::services::task_queue;
use crate::services::voice_store::{self, VoiceFilter};
use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use std::sync::Arc;

/// Everything a job run needs.
#[derive(Clone)]
pub struct JobContext {
    pub pool: DbPool,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub settings: JobSettings,
}

/// What a job run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job changed state and its chain ends here.
    Done,
    /// The job queued itself again.
    Rescheduled,
    /// Nothing to do: the voice is gone or no longer eligible.
    Skipped,
}

/// Check whether `now` falls before `daybreak_hour` in the given UTC offset.
pub fn is_before_daybreak(now: DateTime<Utc>, utc_offset_minutes: i32, daybreak_hour: u32) -> bool {
    // Offsets outside ±24h are rejected by config validation
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
    now.with_timezone(&offset).hour() < daybreak_hour
}

impl JobContext {
    async fn reschedule(&self, kind: TaskKind, voice_id: i64) -> Result<JobOutcome, AppError> {
        let delay = self.settings.timings.delay_for(kind);
        task_queue::schedule_in(&self.pool, kind, voice_id, delay, self.clock.timestamp()).await?;
        Ok(JobOutcome::Rescheduled)
    }
}

/// Release the review claim on a voice nobody reviewed in time.
///
/// Runs once; a reviewed or missing voice is left alone.
pub async fn revoke_review(ctx: &JobContext, voice_id: i64) -> Result<JobOutcome, AppError> {
    let Some(voice) = voice_store::get_voice(&ctx.pool, voice_id, VoiceFilter::Unreviewed).await?
    else {
        return Ok(JobOutcome::Skipped);
    };

    // Reviewed or deleted between read and write
    if !voice_store::release_review_claim(&ctx.pool, voice_id).await? {
        return Ok(JobOutcome::Skipped);
    }

    log::info!(
        "[jobs] Released review claim of admin {:?} on voice {}",
        voice.assigned_admin,
        voice_id
    );
    Ok(JobOutcome::Done)
}

/// Decide a voice by its votes, or try again later.
///
/// Order of operations:
/// 1. Purge the completed-task log.
/// 2. Before daybreak in the decision time zone, reschedule without looking at the voice.
/// 3. Stop if the voice is gone or already decided.
/// 4. With no votes at all, reschedule. Otherwise delete the vote message and
///    accept (ties included) or deny.
pub async fn check_voice(ctx: &JobContext, voice_id: i64) -> Result<JobOutcome, AppError> {
    let purged = task_queue::clear_completed(&ctx.pool).await?;
    if purged > 0 {
        log::debug!("[jobs] Purged {} completed task(s)", purged);
    }

    if is_before_daybreak(
        ctx.clock.now(),
        ctx.settings.utc_offset_minutes,
        ctx.settings.daybreak_hour,
    ) {
        log::debug!("[jobs] Too early to decide voice {}, rescheduling", voice_id);
        return ctx.reschedule(TaskKind::CheckVoice, voice_id).await;
    }

    let Some(voice) = voice_store::get_voice(&ctx.pool, voice_id, VoiceFilter::Pending).await? else {
        return Ok(JobOutcome::Skipped);
    };

    let counts = voice_store::vote_counts(&ctx.pool, voice_id).await?;

    let Some(decision) = counts.decide() else {
        log::debug!("[jobs] No votes on voice {} yet, rescheduling", voice_id);
        return ctx.reschedule(TaskKind::CheckVoice, voice_id).await;
    };

    if let Some(message_id) = voice.message_id {
        ctx.notifier.delete_message(message_id).await?;
    }

    let transitioned = match decision {
        VoteKind::Accept => voice_store::accept_voice(&ctx.pool, voice_id).await?,
        VoteKind::Deny => voice_store::deny_voice(&ctx.pool, voice_id).await?,
    };

    if transitioned {
        log::info!(
            "[jobs] Voice {} decided: {} ({} accept / {} deny)",
            voice_id,
            decision,
            counts.accept,
            counts.deny
        );
        Ok(JobOutcome::Done)
    } else {
        // Another run decided it while we were deleting the message
        Ok(JobOutcome::Skipped)
    }
}

/// Refresh the vote counter of a pending voice and queue the next refresh.
///
/// The chain ends as soon as the voice is decided or removed.
pub async fn update_votes(ctx: &JobContext, voice_id: i64) -> Result<JobOutcome, AppError> {
    let Some(voice) = voice_store::get_voice(&ctx.pool, voice_id, VoiceFilter::Pending).await? else {
        return Ok(JobOutcome::Skipped);
    };

    if let Some(message_id) = voice.message_id {
        let counts = voice_store::vote_counts(&ctx.pool, voice_id).await?;
        ctx.notifier.edit_vote_count(message_id, counts).await?;
    }

    ctx.reschedule(TaskKind::UpdateVotes, voice_id).await
}

/// Run the job a queued task names.
pub async fn run_task(ctx: &JobContext, task: &ScheduledTask) -> Result<JobOutcome, AppError> {
    let Some(kind) = task.kind() else {
        return Err(AppError::scheduler_with_task(
            format!("Unknown task '{}'", task.task_name),
            task.id,
        ));
    };

    match kind {
        TaskKind::RevokeReview => revoke_review(ctx, task.voice_id).await,
        TaskKind::CheckVoice => check_voice(ctx, task.voice_id).await,
        TaskKind::UpdateVotes => update_votes(ctx, task.voice_id).await,
    }
}
