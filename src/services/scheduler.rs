//! Background scheduler for queued vote jobs.
//!
//! Wakes up every `poll_interval_secs` (or on demand), claims the due tasks,
//! runs them with up to `workers` in flight, and records each run in the
//! queue: completed tasks move to the log, failed ones are retried with
//! backoff.

use crate::error::AppError;
use crate::models::task::ScheduledTask;
use crate::services::jobs::{self, JobContext, JobOutcome};
use crate::services::task_queue::{self, FailOutcome};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Default seconds between two queue polls.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between two queue polls.
    pub poll_interval_secs: u64,

    /// Tasks run concurrently within one poll. 1 runs them serially.
    pub workers: usize,

    /// Maximum tasks claimed per poll.
    pub batch_size: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            workers: 1,
            batch_size: 100,
        }
    }
}

/// Status of the scheduler.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    /// Whether the background loop is alive.
    pub is_running: bool,

    /// Last poll timestamp.
    pub last_tick: Option<i64>,

    /// Task runs that succeeded since start.
    pub tasks_succeeded: u64,

    /// Task runs that failed since start.
    pub tasks_failed: u64,

    /// Last task or poll error message.
    pub last_error: Option<String>,
}

/// Result of one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickResult {
    /// Tasks claimed from the queue.
    pub claimed: usize,

    /// Runs that completed (done, rescheduled or skipped).
    pub succeeded: usize,

    /// Runs that returned an error.
    pub failed: usize,

    /// Error messages of the failed runs.
    pub errors: Vec<String>,
}

/// Commands that can be sent to the scheduler.
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Poll the queue immediately.
    RunNow,
}

/// Lightweight handle for controlling the background scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    cancel_token: CancellationToken,
    finished: CancellationToken,
    status: Arc<RwLock<SchedulerStatus>>,
}

impl SchedulerHandle {
    /// Poll the queue now instead of waiting for the next interval.
    pub async fn trigger(&self) -> Result<(), AppError> {
        self.command_tx
            .send(SchedulerCommand::RunNow)
            .await
            .map_err(|_| AppError::scheduler("Scheduler not running"))
    }

    /// Get a snapshot of the scheduler status.
    pub async fn status(&self) -> SchedulerStatus {
        self.status.read().await.clone()
    }

    /// Stop the scheduler and wait for the in-flight poll to finish.
    pub async fn stop(&self) {
        self.cancel_token.cancel();
        self.finished.cancelled().await;
    }
}

/// Background scheduler.
pub struct Scheduler {
    ctx: JobContext,
    config: SchedulerConfig,
    status: Arc<RwLock<SchedulerStatus>>,
}

impl Scheduler {
    /// Start the background polling loop.
    ///
    /// Spawns a task that owns the scheduler and returns a `SchedulerHandle`
    /// for triggering polls and stopping it.
    pub fn start_background(ctx: JobContext, config: SchedulerConfig) -> SchedulerHandle {
        let (tx, mut rx) = mpsc::channel::<SchedulerCommand>(16);
        let cancel_token = CancellationToken::new();
        let finished = CancellationToken::new();
        let status = Arc::new(RwLock::new(SchedulerStatus {
            is_running: true,
            ..SchedulerStatus::default()
        }));

        let scheduler = Scheduler {
            ctx,
            config,
            status: status.clone(),
        };
        let cancel = cancel_token.clone();
        let done = finished.clone();

        tokio::spawn(async move {
            log::info!(
                "[scheduler] Started: polling every {}s with {} worker(s)",
                scheduler.config.poll_interval_secs,
                scheduler.config.workers
            );

            let mut interval =
                time::interval(Duration::from_secs(scheduler.config.poll_interval_secs.max(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                    Some(cmd) = rx.recv() => match cmd {
                        SchedulerCommand::RunNow => log::debug!("[scheduler] Poll triggered"),
                    },
                }

                scheduler.tick().await;
            }

            // Close the channel before reporting, so trigger() fails from here on
            drop(rx);
            scheduler.status.write().await.is_running = false;
            log::info!("[scheduler] Stopped");
            done.cancel();
        });

        SchedulerHandle {
            command_tx: tx,
            cancel_token,
            finished,
            status,
        }
    }

    /// Run one poll and fold its result into the shared status.
    async fn tick(&self) {
        let result = Self::run_due(&self.ctx, &self.config).await;

        let mut status = self.status.write().await;
        status.last_tick = Some(self.ctx.clock.timestamp());

        match result {
            Ok(r) => {
                if r.claimed > 0 {
                    log::info!(
                        "[scheduler] Ran {} task(s): {} ok, {} failed",
                        r.claimed,
                        r.succeeded,
                        r.failed
                    );
                }
                status.tasks_succeeded += r.succeeded as u64;
                status.tasks_failed += r.failed as u64;
                if let Some(err) = r.errors.last() {
                    status.last_error = Some(err.clone());
                }
            }
            Err(e) => {
                log::error!("[scheduler] Poll error: {}", e);
                status.last_error = Some(e.to_string());
            }
        }
    }

    /// Claim and run every task due now.
    ///
    /// # Returns
    /// Per-poll counts; task failures are recorded in the queue, not returned
    /// as errors
    pub async fn run_due(ctx: &JobContext, config: &SchedulerConfig) -> Result<TickResult, AppError> {
        let now = ctx.clock.timestamp();
        let tasks = task_queue::lock_due_tasks(&ctx.pool, now, config.batch_size).await?;

        let mut result = TickResult {
            claimed: tasks.len(),
            ..TickResult::default()
        };

        let runs: Vec<Result<(), String>> = stream::iter(tasks)
            .map(|task| async move { run_one(ctx, &task).await })
            .buffer_unordered(config.workers.max(1))
            .collect()
            .await;

        for run in runs {
            match run {
                Ok(()) => result.succeeded += 1,
                Err(e) => {
                    result.failed += 1;
                    result.errors.push(e);
                }
            }
        }

        Ok(result)
    }
}

/// Run a claimed task and record the outcome in the queue.
async fn run_one(ctx: &JobContext, task: &ScheduledTask) -> Result<(), String> {
    match jobs::run_task(ctx, task).await {
        Ok(outcome) => {
            if outcome != JobOutcome::Skipped {
                log::debug!(
                    "[scheduler] {} #{} for voice {}: {:?}",
                    task.task_name,
                    task.id,
                    task.voice_id,
                    outcome
                );
            }
            task_queue::complete_task(&ctx.pool, task, ctx.clock.timestamp())
                .await
                .map_err(|e| format!("Task {} ran but could not be completed: {}", task.id, e))
        }
        Err(job_err) => {
            let message = job_err.to_string();
            match task_queue::fail_task(&ctx.pool, task, &message, ctx.clock.timestamp()).await {
                Ok(FailOutcome::Retrying { run_at }) => log::warn!(
                    "[scheduler] {} #{} failed, retrying at {}: {}",
                    task.task_name,
                    task.id,
                    run_at,
                    message
                ),
                Ok(FailOutcome::GaveUp) => log::error!(
                    "[scheduler] {} #{} failed for good after {} attempts: {}",
                    task.task_name,
                    task.id,
                    ScheduledTask::MAX_ATTEMPTS,
                    message
                ),
                Err(mark_err) => {
                    return Err(format!(
                        "Task {} failed ({}) and failed to update status: {}",
                        task.id, message, mark_err
                    ))
                }
            }
            Err(format!("Task {}: {}", task.id, message))
        }
    }
}
