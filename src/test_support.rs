//! Shared fixtures for unit tests.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::voice::VoteCounts;
use crate::services::notifier::Notifier;
use async_trait::async_trait;
use std::sync::Mutex;
use tempfile::tempdir;

/// Create a migrated database in a fresh temp directory.
pub async fn setup_test_db() -> DbPool {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    // Keep the dir alive by leaking it (for test purposes)
    std::mem::forget(dir);

    crate::db::initialize(&db_path, 1).await.unwrap()
}

/// Insert a voice directly, bypassing job scheduling.
pub async fn insert_voice(pool: &DbPool, status: &str, reviewed: bool) -> i64 {
    sqlx::query_scalar(
        r#"
        INSERT INTO voices (file_id, name, sender_id, status, reviewed, created_at)
        VALUES ('AwACAgQAAxkBAAI', 'test voice', 1, ?, ?, 0)
        RETURNING id
        "#,
    )
    .bind(status)
    .bind(reviewed)
    .fetch_one(pool)
    .await
    .unwrap()
}

/// Add votes from fresh users, regardless of the voice's status.
pub async fn add_votes(pool: &DbPool, voice_id: i64, accept: i64, deny: i64) {
    let (last_user,): (i64,) =
        sqlx::query_as("SELECT COALESCE(MAX(user_id), 0) FROM voice_votes WHERE voice_id = ?")
            .bind(voice_id)
            .fetch_one(pool)
            .await
            .unwrap();

    let kinds = std::iter::repeat("accept")
        .take(accept as usize)
        .chain(std::iter::repeat("deny").take(deny as usize));

    for (offset, kind) in kinds.enumerate() {
        sqlx::query("INSERT INTO voice_votes (voice_id, user_id, kind) VALUES (?, ?, ?)")
            .bind(voice_id)
            .bind(last_user + 1 + offset as i64)
            .bind(kind)
            .execute(pool)
            .await
            .unwrap();
    }
}

/// Notifier that records calls and can be told to fail once.
#[derive(Default)]
pub struct RecordingNotifier {
    deleted: Mutex<Vec<i64>>,
    edits: Mutex<Vec<(i64, VoteCounts)>>,
    fail_next: Mutex<Option<String>>,
}

impl RecordingNotifier {
    pub fn deleted(&self) -> Vec<i64> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<(i64, VoteCounts)> {
        self.edits.lock().unwrap().clone()
    }

    /// Make the next call fail with `message`.
    pub fn fail_next(&self, message: &str) {
        *self.fail_next.lock().unwrap() = Some(message.to_string());
    }

    fn take_failure(&self) -> Result<(), AppError> {
        match self.fail_next.lock().unwrap().take() {
            Some(message) => Err(AppError::notification(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn delete_message(&self, message_id: i64) -> Result<(), AppError> {
        self.take_failure()?;
        self.deleted.lock().unwrap().push(message_id);
        Ok(())
    }

    async fn edit_vote_count(&self, message_id: i64, counts: VoteCounts) -> Result<(), AppError> {
        self.take_failure()?;
        self.edits.lock().unwrap().push((message_id, counts));
        Ok(())
    }
}
