//! Queue recovery tests.
//!
//! Jobs must survive a flaky Telegram API and a worker that dies mid-run:
//! - A failed run is retried after its backoff, and gives up after too many attempts
//! - A claim abandoned by a crashed worker is taken over once it goes stale
//! - A row naming no known job fails without touching the rest of the queue

use chrono::{DateTime, Duration};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use voice_review::config::JobSettings;
use voice_review::error::AppError;
use voice_review::models::{ScheduledTask, TaskKind, VoteCounts, VoteKind, VoiceStatus};
use voice_review::services::clock::{Clock, FixedClock};
use voice_review::services::jobs::JobContext;
use voice_review::services::notifier::Notifier;
use voice_review::services::scheduler::{Scheduler, SchedulerConfig};
use voice_review::services::task_queue;
use voice_review::services::voice_store::{self, NewVoice, VoiceFilter};

/// 2024-03-10 06:30 UTC, 10:00 in Tehran
const MORNING: i64 = 1_710_052_200;

/// Notifier whose message deletions fail a set number of times.
#[derive(Default)]
struct FlakyNotifier {
    delete_failures: AtomicUsize,
    deleted: Mutex<Vec<i64>>,
}

impl FlakyNotifier {
    fn failing(times: usize) -> Self {
        Self {
            delete_failures: AtomicUsize::new(times),
            ..Self::default()
        }
    }
}

#[async_trait::async_trait]
impl Notifier for FlakyNotifier {
    async fn delete_message(&self, message_id: i64) -> Result<(), AppError> {
        let left = self.delete_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.delete_failures.store(left - 1, Ordering::SeqCst);
            return Err(AppError::network("connection reset by peer"));
        }
        self.deleted.lock().unwrap().push(message_id);
        Ok(())
    }

    async fn edit_vote_count(&self, _message_id: i64, _counts: VoteCounts) -> Result<(), AppError> {
        Ok(())
    }
}

async fn setup(notifier: Arc<FlakyNotifier>) -> (JobContext, Arc<FixedClock>) {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("queue.db");
    std::mem::forget(dir);

    let pool = voice_review::db::initialize(&db_path, 1).await.unwrap();
    let clock = Arc::new(FixedClock::at_timestamp(MORNING));

    let ctx = JobContext {
        pool,
        notifier,
        clock: clock.clone(),
        settings: JobSettings::default(),
    };
    (ctx, clock)
}

/// Submit a voice with one accept vote, so its decision job will accept it.
async fn voted_voice(ctx: &JobContext) -> i64 {
    let voice = voice_store::create_voice(
        &ctx.pool,
        NewVoice {
            file_id: "AwACAgQAAxkBAAI".to_string(),
            name: "kettle".to_string(),
            sender_id: 1000,
        },
        &ctx.settings.timings,
        ctx.clock.timestamp(),
    )
    .await
    .unwrap();

    voice_store::attach_message(&ctx.pool, voice.id, 900).await.unwrap();
    voice_store::cast_vote(&ctx.pool, voice.id, 11, VoteKind::Accept)
        .await
        .unwrap();
    voice.id
}

async fn check_task(ctx: &JobContext, voice_id: i64) -> Option<ScheduledTask> {
    task_queue::pending_tasks_for(&ctx.pool, voice_id)
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.kind() == Some(TaskKind::CheckVoice))
}

async fn status(ctx: &JobContext, voice_id: i64) -> VoiceStatus {
    voice_store::get_voice(&ctx.pool, voice_id, VoiceFilter::Any)
        .await
        .unwrap()
        .unwrap()
        .status_enum()
}

#[tokio::test]
async fn test_failed_decision_retried_after_backoff() {
    let notifier = Arc::new(FlakyNotifier::failing(1));
    let (ctx, clock) = setup(notifier.clone()).await;
    let config = SchedulerConfig::default();
    let id = voted_voice(&ctx).await;

    clock.advance(Duration::seconds(21_600));
    let result = Scheduler::run_due(&ctx, &config).await.unwrap();
    assert_eq!(result.failed, 1);
    assert!(result.errors[0].contains("connection reset"));

    // Still pending, message untouched, retry queued
    assert_eq!(status(&ctx, id).await, VoiceStatus::Pending);
    let task = check_task(&ctx, id).await.unwrap();
    assert_eq!(task.attempts, 1);
    assert_eq!(task.locked_at, None);
    assert_eq!(task.run_at, clock.timestamp() + ScheduledTask::backoff_secs(1));
    assert!(task.last_error.unwrap().contains("connection reset"));

    // Not yet due
    clock.advance(Duration::seconds(1));
    Scheduler::run_due(&ctx, &config).await.unwrap();
    assert_eq!(status(&ctx, id).await, VoiceStatus::Pending);

    clock.advance(Duration::seconds(ScheduledTask::backoff_secs(1)));
    let result = Scheduler::run_due(&ctx, &config).await.unwrap();
    assert_eq!(result.failed, 0);
    assert_eq!(status(&ctx, id).await, VoiceStatus::Accepted);
    assert_eq!(*notifier.deleted.lock().unwrap(), vec![900]);

    let log = task_queue::get_completed_tasks(&ctx.pool).await.unwrap();
    let entry = log.iter().find(|t| t.task_name == "check_voice").unwrap();
    assert_eq!(entry.attempts, 1);
    assert!(!entry.failed);
}

#[tokio::test]
async fn test_decision_given_up_after_max_attempts() {
    let notifier = Arc::new(FlakyNotifier::failing(usize::MAX));
    let (mut ctx, clock) = setup(notifier.clone()).await;
    // Backoff spans days; a retry landing before daybreak would start a fresh chain
    ctx.settings.daybreak_hour = 0;
    let config = SchedulerConfig::default();
    let id = voted_voice(&ctx).await;

    let mut runs = 0;
    while let Some(task) = check_task(&ctx, id).await {
        clock.set(DateTime::from_timestamp(task.run_at, 0).unwrap());
        Scheduler::run_due(&ctx, &config).await.unwrap();
        runs += 1;
        assert!(runs <= ScheduledTask::MAX_ATTEMPTS, "task never given up");
    }

    assert_eq!(runs, ScheduledTask::MAX_ATTEMPTS);
    assert_eq!(status(&ctx, id).await, VoiceStatus::Pending);

    let log = task_queue::get_completed_tasks(&ctx.pool).await.unwrap();
    let entry = log.iter().find(|t| t.task_name == "check_voice").unwrap();
    assert!(entry.failed);
    assert_eq!(entry.attempts, ScheduledTask::MAX_ATTEMPTS);
    assert_eq!(task_queue::task_counts(&ctx.pool).await.unwrap().failed, 1);
}

#[tokio::test]
async fn test_abandoned_claim_taken_over_when_stale() {
    let notifier = Arc::new(FlakyNotifier::default());
    let (ctx, clock) = setup(notifier.clone()).await;
    let config = SchedulerConfig::default();
    let id = voted_voice(&ctx).await;

    clock.advance(Duration::seconds(21_600));

    // A worker claims everything due, then dies
    let claimed = task_queue::lock_due_tasks(&ctx.pool, clock.timestamp(), 100)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 2);

    clock.advance(Duration::seconds(60));
    let result = Scheduler::run_due(&ctx, &config).await.unwrap();
    assert_eq!(result.claimed, 0);
    assert_eq!(status(&ctx, id).await, VoiceStatus::Pending);

    clock.advance(Duration::seconds(ScheduledTask::MAX_RUN_TIME_SECS));
    let result = Scheduler::run_due(&ctx, &config).await.unwrap();
    assert_eq!(result.claimed, 2);
    assert_eq!(result.failed, 0);
    assert_eq!(status(&ctx, id).await, VoiceStatus::Accepted);
}

#[tokio::test]
async fn test_unknown_task_fails_alone() {
    let notifier = Arc::new(FlakyNotifier::default());
    let (ctx, clock) = setup(notifier.clone()).await;
    let config = SchedulerConfig::default();
    let id = voted_voice(&ctx).await;

    sqlx::query(
        "INSERT INTO scheduled_tasks (task_name, voice_id, run_at, created_at) VALUES ('send_digest', ?, ?, ?)",
    )
    .bind(id)
    .bind(MORNING)
    .bind(MORNING)
    .execute(&ctx.pool)
    .await
    .unwrap();

    clock.advance(Duration::seconds(21_600));
    let result = Scheduler::run_due(&ctx, &config).await.unwrap();

    assert_eq!(result.claimed, 3);
    assert_eq!(result.succeeded, 2);
    assert_eq!(result.failed, 1);
    assert!(result.errors[0].contains("send_digest"));
    assert_eq!(status(&ctx, id).await, VoiceStatus::Accepted);
}
