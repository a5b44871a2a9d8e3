//! Voice persistence service.
//!
//! Lookups return `Option<Voice>`: a voice that disappeared or no longer
//! matches the filter is an ordinary outcome for the jobs, not an error.

use crate::config::JobTimings;
use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::task::TaskKind;
use crate::models::voice::{VoteCounts, VoteKind, Voice, VoiceStatus};
use crate::services::task_queue;
use sqlx::Row;

/// Restriction applied when looking a voice up by ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceFilter {
    /// Any status.
    Any,
    /// Only voices still open for voting.
    Pending,
    /// Only voices no admin has reviewed yet.
    Unreviewed,
}

/// Input for submitting a new voice.
#[derive(Debug, Clone)]
pub struct NewVoice {
    pub file_id: String,
    pub name: String,
    pub sender_id: i64,
}

/// Effect of a vote cast on a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteChange {
    /// The user had not voted before.
    Added,
    /// The user changed sides.
    Switched,
    /// The user voted the same way again, withdrawing the vote.
    Retracted,
}

/// Get a voice by ID, subject to a filter.
///
/// # Arguments
/// * `pool` - Database connection pool
/// * `voice_id` - Voice ID
/// * `filter` - Extra condition the voice must satisfy
///
/// # Returns
/// The voice, or `None` if it does not exist or does not match
pub async fn get_voice(
    pool: &DbPool,
    voice_id: i64,
    filter: VoiceFilter,
) -> Result<Option<Voice>, AppError> {
    let condition = match filter {
        VoiceFilter::Any => "",
        VoiceFilter::Pending => " AND status = 'pending'",
        VoiceFilter::Unreviewed => " AND reviewed = 0",
    };

    let sql = format!(
        "SELECT id, file_id, name, sender_id, status, reviewed, assigned_admin, message_id, created_at \
         FROM voices WHERE id = ?{}",
        condition
    );

    let voice = sqlx::query_as::<_, Voice>(&sql)
        .bind(voice_id)
        .fetch_optional(pool)
        .await?;

    Ok(voice)
}

/// Release the review claim on a voice nobody has reviewed yet.
///
/// Only `assigned_admin` is written, so a decision or review recorded since
/// the voice was read is left intact.
///
/// # Returns
/// `true` if the claim was cleared, `false` if the voice is gone or has
/// been reviewed in the meantime
pub async fn release_review_claim(pool: &DbPool, voice_id: i64) -> Result<bool, AppError> {
    let result = sqlx::query("UPDATE voices SET assigned_admin = NULL WHERE id = ? AND reviewed = 0")
        .bind(voice_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Mark a pending voice as accepted.
///
/// # Returns
/// `true` if this call made the transition, `false` if the voice was
/// missing or already decided
pub async fn accept_voice(pool: &DbPool, voice_id: i64) -> Result<bool, AppError> {
    finalize_voice(pool, voice_id, VoiceStatus::Accepted).await
}

/// Mark a pending voice as denied.
///
/// # Returns
/// `true` if this call made the transition
pub async fn deny_voice(pool: &DbPool, voice_id: i64) -> Result<bool, AppError> {
    finalize_voice(pool, voice_id, VoiceStatus::Denied).await
}

async fn finalize_voice(
    pool: &DbPool,
    voice_id: i64,
    status: VoiceStatus,
) -> Result<bool, AppError> {
    let result = sqlx::query("UPDATE voices SET status = ? WHERE id = ? AND status = 'pending'")
        .bind(status.to_string())
        .bind(voice_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Count the accept and deny votes of a voice.
pub async fn vote_counts(pool: &DbPool, voice_id: i64) -> Result<VoteCounts, AppError> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(CASE WHEN kind = 'accept' THEN 1 END) as accept,
            COUNT(CASE WHEN kind = 'deny' THEN 1 END) as deny
        FROM voice_votes
        WHERE voice_id = ?
        "#,
    )
    .bind(voice_id)
    .fetch_one(pool)
    .await?;

    Ok(VoteCounts {
        accept: row.get("accept"),
        deny: row.get("deny"),
    })
}

/// Store a newly submitted voice and queue its vote jobs.
///
/// Queues the decision job after `timings.check_voice_secs` and the first
/// counter refresh after `timings.update_votes_secs`.
pub async fn create_voice(
    pool: &DbPool,
    input: NewVoice,
    timings: &JobTimings,
    now: i64,
) -> Result<Voice, AppError> {
    if input.file_id.trim().is_empty() {
        return Err(AppError::invalid_input_field("File ID is required", "file_id"));
    }
    if input.name.trim().is_empty() {
        return Err(AppError::invalid_input_field("Name is required", "name"));
    }

    let voice = sqlx::query_as::<_, Voice>(
        r#"
        INSERT INTO voices (file_id, name, sender_id, status, reviewed, created_at)
        VALUES (?, ?, ?, 'pending', 0, ?)
        RETURNING id, file_id, name, sender_id, status, reviewed, assigned_admin, message_id, created_at
        "#,
    )
    .bind(&input.file_id)
    .bind(input.name.trim())
    .bind(input.sender_id)
    .bind(now)
    .fetch_one(pool)
    .await?;

    task_queue::schedule_in(pool, TaskKind::CheckVoice, voice.id, timings.check_voice_secs, now)
        .await?;
    task_queue::schedule_in(pool, TaskKind::UpdateVotes, voice.id, timings.update_votes_secs, now)
        .await?;

    log::info!("[voices] Voice {} '{}' submitted by {}", voice.id, voice.name, voice.sender_id);

    Ok(voice)
}

/// Record the Telegram message carrying the vote keyboard of a voice.
pub async fn attach_message(pool: &DbPool, voice_id: i64, message_id: i64) -> Result<(), AppError> {
    let result = sqlx::query("UPDATE voices SET message_id = ? WHERE id = ?")
        .bind(message_id)
        .bind(voice_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found_with_id("Voice", voice_id.to_string()));
    }

    Ok(())
}

/// Give an admin the review claim on a voice.
///
/// The claim is released by the `revoke_review` job after
/// `timings.revoke_review_secs` unless the voice is reviewed first.
pub async fn assign_reviewer(
    pool: &DbPool,
    voice_id: i64,
    admin_id: i64,
    timings: &JobTimings,
    now: i64,
) -> Result<(), AppError> {
    let result = sqlx::query("UPDATE voices SET assigned_admin = ? WHERE id = ?")
        .bind(admin_id)
        .bind(voice_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found_with_id("Voice", voice_id.to_string()));
    }

    task_queue::schedule_in(pool, TaskKind::RevokeReview, voice_id, timings.revoke_review_secs, now)
        .await?;

    Ok(())
}

/// Flag a voice as reviewed by an admin.
pub async fn mark_reviewed(pool: &DbPool, voice_id: i64) -> Result<(), AppError> {
    let result = sqlx::query("UPDATE voices SET reviewed = 1 WHERE id = ?")
        .bind(voice_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found_with_id("Voice", voice_id.to_string()));
    }

    Ok(())
}

/// Cast a user's vote on a pending voice.
///
/// A user holds at most one vote per voice. Voting the same way twice
/// withdraws the vote; voting the other way switches it. Concurrent votes
/// by the same user are applied one after the other.
pub async fn cast_vote(
    pool: &DbPool,
    voice_id: i64,
    user_id: i64,
    kind: VoteKind,
) -> Result<VoteChange, AppError> {
    let mut tx = pool.begin().await?;

    // Write first so the transaction holds the write lock before it reads
    let retracted =
        sqlx::query("DELETE FROM voice_votes WHERE voice_id = ? AND user_id = ? AND kind = ?")
            .bind(voice_id)
            .bind(user_id)
            .bind(kind.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected()
            == 1;

    let open: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM voices WHERE id = ? AND status = 'pending'")
            .bind(voice_id)
            .fetch_optional(&mut *tx)
            .await?;

    if open.is_none() {
        return Err(AppError::invalid_input(format!(
            "Voice {} is not open for voting",
            voice_id
        )));
    }

    let change = if retracted {
        VoteChange::Retracted
    } else {
        let switched = sqlx::query("UPDATE voice_votes SET kind = ? WHERE voice_id = ? AND user_id = ?")
            .bind(kind.to_string())
            .bind(voice_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            == 1;

        if switched {
            VoteChange::Switched
        } else {
            sqlx::query("INSERT INTO voice_votes (voice_id, user_id, kind) VALUES (?, ?, ?)")
                .bind(voice_id)
                .bind(user_id)
                .bind(kind.to_string())
                .execute(&mut *tx)
                .await?;
            VoteChange::Added
        }
    };

    tx.commit().await?;

    Ok(change)
}
