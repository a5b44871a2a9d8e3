//! Delayed task queue persistence service.
//!
//! Job invocations are stored in SQLite with the earliest time they may run.
//! The scheduler claims due rows, runs them and either moves them into the
//! completed-task log or pushes them back with a backoff.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::task::{CompletedTask, ScheduledTask, TaskKind};
use serde::Serialize;
use sqlx::Row;

/// Outcome of recording a failed task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The task was pushed back and runs again at `run_at`.
    Retrying { run_at: i64 },
    /// The task exhausted its attempts and was logged as failed.
    GaveUp,
}

/// Queue size summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    /// Tasks waiting in the queue.
    pub queued: i64,
    /// Successful entries in the completed-task log.
    pub completed: i64,
    /// Given-up entries in the completed-task log.
    pub failed: i64,
}

/// Queue a task to run at an absolute time.
///
/// # Arguments
/// * `pool` - Database connection pool
/// * `kind` - Job to run
/// * `voice_id` - Voice the job runs against
/// * `run_at` - Earliest run time (Unix)
///
/// # Returns
/// The created ScheduledTask with its ID
pub async fn schedule(
    pool: &DbPool,
    kind: TaskKind,
    voice_id: i64,
    run_at: i64,
) -> Result<ScheduledTask, AppError> {
    let task = sqlx::query_as::<_, ScheduledTask>(
        r#"
        INSERT INTO scheduled_tasks (task_name, voice_id, run_at, attempts, created_at)
        VALUES (?, ?, ?, 0, strftime('%s', 'now'))
        RETURNING id, task_name, voice_id, run_at, attempts, last_error, locked_at, created_at
        "#,
    )
    .bind(kind.to_string())
    .bind(voice_id)
    .bind(run_at)
    .fetch_one(pool)
    .await?;

    log::debug!(
        "[queue] Scheduled {} #{} for voice {} at {}",
        kind,
        task.id,
        voice_id,
        run_at
    );

    Ok(task)
}

/// Queue a task to run `delay_secs` after `now`.
pub async fn schedule_in(
    pool: &DbPool,
    kind: TaskKind,
    voice_id: i64,
    delay_secs: i64,
    now: i64,
) -> Result<ScheduledTask, AppError> {
    schedule(pool, kind, voice_id, now + delay_secs).await
}

/// Get a single queued task.
pub async fn get_task(pool: &DbPool, task_id: i64) -> Result<Option<ScheduledTask>, AppError> {
    let task = sqlx::query_as::<_, ScheduledTask>(
        r#"
        SELECT id, task_name, voice_id, run_at, attempts, last_error, locked_at, created_at
        FROM scheduled_tasks
        WHERE id = ?
        "#,
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    Ok(task)
}

/// Claim up to `limit` due tasks for execution.
///
/// A task is due when `run_at <= now` and it is either unclaimed or its claim
/// is older than `ScheduledTask::MAX_RUN_TIME_SECS`. Each claim is a guarded
/// update, so two schedulers sharing the file never claim the same row.
///
/// # Returns
/// The claimed tasks ordered by run time, with `locked_at` set to `now`
pub async fn lock_due_tasks(
    pool: &DbPool,
    now: i64,
    limit: i64,
) -> Result<Vec<ScheduledTask>, AppError> {
    let stale_before = now - ScheduledTask::MAX_RUN_TIME_SECS;

    let candidates = sqlx::query_as::<_, ScheduledTask>(
        r#"
        SELECT id, task_name, voice_id, run_at, attempts, last_error, locked_at, created_at
        FROM scheduled_tasks
        WHERE run_at <= ? AND (locked_at IS NULL OR locked_at <= ?)
        ORDER BY run_at ASC, id ASC
        LIMIT ?
        "#,
    )
    .bind(now)
    .bind(stale_before)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut claimed = Vec::with_capacity(candidates.len());

    for mut task in candidates {
        let result = sqlx::query(
            "UPDATE scheduled_tasks SET locked_at = ? WHERE id = ? AND (locked_at IS NULL OR locked_at <= ?)",
        )
        .bind(now)
        .bind(task.id)
        .bind(stale_before)
        .execute(pool)
        .await?;

        if result.rows_affected() == 1 {
            task.locked_at = Some(now);
            claimed.push(task);
        }
    }

    Ok(claimed)
}

/// Move a finished task from the queue into the completed-task log.
pub async fn complete_task(pool: &DbPool, task: &ScheduledTask, now: i64) -> Result<(), AppError> {
    archive_task(pool, task, task.attempts, task.last_error.as_deref(), false, now).await
}

/// Record a failed run of a task.
///
/// Increments the attempt count. Below `ScheduledTask::MAX_ATTEMPTS` the task
/// is released and pushed back by `ScheduledTask::backoff_secs`; otherwise it
/// is moved to the completed-task log with `failed` set.
///
/// # Arguments
/// * `pool` - Database connection pool
/// * `task` - The task that failed
/// * `error` - Error message
/// * `now` - Current time (Unix)
pub async fn fail_task(
    pool: &DbPool,
    task: &ScheduledTask,
    error: &str,
    now: i64,
) -> Result<FailOutcome, AppError> {
    let row = sqlx::query("SELECT attempts FROM scheduled_tasks WHERE id = ?")
        .bind(task.id)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Err(AppError::not_found_with_id("ScheduledTask", task.id.to_string()));
    };

    let attempts: i64 = row.get("attempts");
    let attempts = attempts + 1;

    if attempts >= ScheduledTask::MAX_ATTEMPTS {
        archive_task(pool, task, attempts, Some(error), true, now).await?;
        return Ok(FailOutcome::GaveUp);
    }

    let run_at = now + ScheduledTask::backoff_secs(attempts);

    sqlx::query(
        "UPDATE scheduled_tasks SET attempts = ?, last_error = ?, run_at = ?, locked_at = NULL WHERE id = ?",
    )
    .bind(attempts)
    .bind(error)
    .bind(run_at)
    .bind(task.id)
    .execute(pool)
    .await?;

    Ok(FailOutcome::Retrying { run_at })
}

/// Copy a task into `completed_tasks` and drop it from the queue atomically.
async fn archive_task(
    pool: &DbPool,
    task: &ScheduledTask,
    attempts: i64,
    last_error: Option<&str>,
    failed: bool,
    now: i64,
) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO completed_tasks (task_name, voice_id, run_at, attempts, last_error, failed, completed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&task.task_name)
    .bind(task.voice_id)
    .bind(task.run_at)
    .bind(attempts)
    .bind(last_error)
    .bind(failed)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query("DELETE FROM scheduled_tasks WHERE id = ?")
        .bind(task.id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found_with_id("ScheduledTask", task.id.to_string()));
    }

    tx.commit().await?;

    Ok(())
}

/// Purge the completed-task log.
///
/// # Returns
/// Number of deleted log entries
pub async fn clear_completed(pool: &DbPool) -> Result<u64, AppError> {
    let result = sqlx::query("DELETE FROM completed_tasks")
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Get all completed-task log entries, newest first.
pub async fn get_completed_tasks(pool: &DbPool) -> Result<Vec<CompletedTask>, AppError> {
    let tasks = sqlx::query_as::<_, CompletedTask>(
        r#"
        SELECT id, task_name, voice_id, run_at, attempts, last_error, failed, completed_at
        FROM completed_tasks
        ORDER BY completed_at DESC, id DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(tasks)
}

/// Get all queued tasks for a voice, ordered by run time.
pub async fn pending_tasks_for(
    pool: &DbPool,
    voice_id: i64,
) -> Result<Vec<ScheduledTask>, AppError> {
    let tasks = sqlx::query_as::<_, ScheduledTask>(
        r#"
        SELECT id, task_name, voice_id, run_at, attempts, last_error, locked_at, created_at
        FROM scheduled_tasks
        WHERE voice_id = ?
        ORDER BY run_at ASC, id ASC
        "#,
    )
    .bind(voice_id)
    .fetch_all(pool)
    .await?;

    Ok(tasks)
}

/// Get queue and log sizes.
pub async fn task_counts(pool: &DbPool) -> Result<TaskCounts, AppError> {
    let row = sqlx::query(
        r#"
        SELECT
            (SELECT COUNT(*) FROM scheduled_tasks) as queued,
            (SELECT COUNT(*) FROM completed_tasks WHERE failed = 0) as completed,
            (SELECT COUNT(*) FROM completed_tasks WHERE failed = 1) as failed
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(TaskCounts {
        queued: row.get("queued"),
        completed: row.get("completed"),
        failed: row.get("failed"),
    })
}
