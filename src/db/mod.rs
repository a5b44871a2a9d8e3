//! Database layer for local SQLite storage.
//!
//! This module handles:
//! - Connection pool management with WAL mode
//! - Schema migrations, each applied once inside a transaction

pub mod pool;

use std::path::Path;
use thiserror::Error;

/// Database-related errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),
}

/// Embedded migrations, in application order.
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_initial_schema",
    include_str!("migrations/0001_initial_schema.sql"),
)];

/// Initialize the database: create the file if needed and run migrations.
///
/// # Arguments
/// * `db_path` - Path to the SQLite database file
/// * `workers` - Job runs the scheduler keeps in flight, for pool sizing
///
/// # Returns
/// A connection pool configured with WAL mode
pub async fn initialize(db_path: &Path, workers: usize) -> Result<pool::DbPool, DbError> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            DbError::Migration(format!("Failed to create database directory: {}", e))
        })?;
    }

    let pool = pool::create_pool(db_path, workers).await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Apply every embedded migration not yet recorded in `_migrations`.
///
/// A migration's statements and its record commit together, so a crash
/// never leaves a half-built schema marked as applied.
async fn run_migrations(pool: &pool::DbPool) -> Result<(), DbError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    for &(name, sql) in MIGRATIONS {
        let applied: Option<(i64,)> = sqlx::query_as("SELECT id FROM _migrations WHERE name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await?;

        if applied.is_some() {
            continue;
        }

        let mut tx = pool.begin().await?;

        for statement in split_statements(sql) {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| DbError::Migration(format!("{}: {}", name, e)))?;
        }

        sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        log::info!("[db] Applied migration {}", name);
    }

    Ok(())
}

/// Split a migration file into statements.
///
/// Comments sit on their own lines and no statement contains a `;`, so
/// dropping comment lines and splitting on `;` is enough.
fn split_statements(sql: &str) -> Vec<String> {
    let code = sql
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    code.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_initialize_creates_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let pool = initialize(&db_path, 1).await.unwrap();

        assert!(db_path.exists());

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_migrations' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(
            table_names,
            vec!["completed_tasks", "scheduled_tasks", "voice_votes", "voices"]
        );
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let _pool1 = initialize(&db_path, 1).await.unwrap();
        let pool2 = initialize(&db_path, 1).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM _migrations")
            .fetch_one(&pool2)
            .await
            .unwrap();
        assert_eq!(count.0, MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn test_initialize_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested/data/test.db");

        initialize(&db_path, 1).await.unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_initial_schema_statements() {
        let statements = split_statements(MIGRATIONS[0].1);

        let creates = statements.iter().filter(|s| s.starts_with("CREATE")).count();
        assert_eq!(creates, statements.len());
        assert_eq!(statements.len(), 7);
        assert!(statements.iter().all(|s| !s.contains("--")));
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS voices"));
    }

    #[test]
    fn test_split_statements_drops_comment_lines() {
        let sql = r#"
            -- header
            CREATE TABLE a (id INTEGER);

            -- created_at defaults to now
            CREATE TABLE b (
                created_at INTEGER DEFAULT (strftime('%s', 'now'))
            );
        "#;

        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "CREATE TABLE a (id INTEGER)");
        assert!(statements[1].contains("strftime('%s', 'now')"));
    }
}
