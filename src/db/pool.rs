//! SQLite connection pool with WAL mode.
//!
//! The scheduler, its job workers and the bot front-end all write to the same
//! file, so the pool runs in WAL mode with a generous busy timeout and is
//! sized from the number of concurrent job runs.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Type alias for the SQLite connection pool.
pub type DbPool = Pool<Sqlite>;

/// Upper bound on pooled connections; SQLite serializes writers anyway.
const MAX_CONNECTIONS: u32 = 16;

/// Connections needed by `workers` concurrent job runs.
///
/// One per worker, one for the poller claiming and archiving tasks, and one
/// left for the front-end casting votes.
pub fn connections_for(workers: usize) -> u32 {
    u32::try_from(workers.max(1))
        .unwrap_or(MAX_CONNECTIONS)
        .saturating_add(2)
        .min(MAX_CONNECTIONS)
}

/// Create a connection pool for `workers` concurrent job runs.
///
/// # Arguments
/// * `db_path` - Path to the SQLite database file
/// * `workers` - Job runs the scheduler keeps in flight
pub async fn create_pool(db_path: &Path, workers: usize) -> Result<DbPool, sqlx::Error> {
    let db_url = format!("sqlite:{}", db_path.display());

    let connect_options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        // Decision and counter jobs for one voice often run in the same poll
        .busy_timeout(Duration::from_secs(30))
        .pragma("wal_autocheckpoint", "1000");

    let pool = SqlitePoolOptions::new()
        .max_connections(connections_for(workers))
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(connect_options)
        .await?;

    let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await?;

    if !mode.0.eq_ignore_ascii_case("wal") {
        log::warn!(
            "[db] {} runs in {} mode; concurrent job runs will contend for the file",
            db_path.display(),
            mode.0
        );
    }

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_pool_with_wal() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let pool = create_pool(&db_path, 1).await.unwrap();

        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.0.to_lowercase(), "wal");

        let fk: (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(fk.0, 1);
    }

    #[tokio::test]
    async fn test_pool_sized_for_workers() {
        let dir = tempdir().unwrap();
        let pool = create_pool(&dir.path().join("test.db"), 4).await.unwrap();

        assert_eq!(pool.options().get_max_connections(), 6);
    }

    #[test]
    fn test_connections_for() {
        assert_eq!(connections_for(0), 3);
        assert_eq!(connections_for(1), 3);
        assert_eq!(connections_for(8), 10);
        assert_eq!(connections_for(100), MAX_CONNECTIONS);
    }

    #[tokio::test]
    async fn test_pool_requires_existing_parent() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("missing/test.db");

        // create_if_missing only creates the file, not directories
        assert!(create_pool(&db_path, 1).await.is_err());

        std::fs::create_dir_all(db_path.parent().unwrap()).unwrap();
        let pool = create_pool(&db_path, 1).await.unwrap();

        let result: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(result.0, 1);
    }
}
