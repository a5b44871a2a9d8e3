//! Voice Review - background vote jobs for a Telegram voice bot.
//!
//! Submitted voices collect accept/deny votes in a chat. This crate runs the
//! delayed jobs around that vote: releasing stale admin review claims,
//! deciding voices once votes are in, and keeping the on-screen vote counter
//! current. Jobs live in a SQLite-backed delay queue polled by a background
//! scheduler.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

#[cfg(test)]
pub(crate) mod test_support;

use config::Config;
use error::AppError;
use services::clock::SystemClock;
use services::jobs::JobContext;
use services::notifier::TelegramNotifier;
use services::scheduler::Scheduler;
use std::sync::Arc;

/// Run the scheduler until Ctrl-C.
pub async fn run(config: Config) -> Result<(), AppError> {
    let pool = db::initialize(&config.database_path, config.scheduler.workers).await?;
    log::info!("[main] Database ready at {}", config.database_path.display());

    let notifier = TelegramNotifier::new(config.telegram.clone())?;

    let ctx = JobContext {
        pool: pool.clone(),
        notifier: Arc::new(notifier),
        clock: Arc::new(SystemClock),
        settings: config.jobs,
    };

    let counts = services::task_queue::task_counts(&pool).await?;
    log::info!(
        "[main] {} task(s) queued, {} completed, {} failed",
        counts.queued,
        counts.completed,
        counts.failed
    );

    let handle = Scheduler::start_background(ctx, config.scheduler.clone());

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::internal(format!("Failed to listen for shutdown signal: {}", e)))?;

    log::info!("[main] Shutdown requested");
    handle.stop().await;
    pool.close().await;

    Ok(())
}
