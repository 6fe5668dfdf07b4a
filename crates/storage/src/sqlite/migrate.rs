use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use super::SqliteInitError;

/// Runs the schema migrations that have not been applied yet.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: quiz progress, one row per attempt.
    if !is_applied(pool, 1).await? {
        info!(version = 1, "applying quiz progress schema");
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS quiz_progress (
                    learner_id INTEGER NOT NULL,
                    quiz_id INTEGER NOT NULL,
                    attempt_number INTEGER NOT NULL CHECK (attempt_number >= 1),
                    cursor INTEGER NOT NULL CHECK (cursor >= 0),
                    status TEXT NOT NULL CHECK (status IN ('in-progress', 'submitted')),
                    started_at TEXT NOT NULL,
                    last_activity_at TEXT NOT NULL,
                    saved_at TEXT,
                    captured_answers TEXT NOT NULL,
                    attempt_data TEXT,
                    lesson_progress TEXT NOT NULL,
                    video_progress TEXT NOT NULL,
                    version INTEGER NOT NULL CHECK (version >= 0),
                    PRIMARY KEY (learner_id, quiz_id, attempt_number)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
