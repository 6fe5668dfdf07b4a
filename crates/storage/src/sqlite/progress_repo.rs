use async_trait::async_trait;
use quiz_core::model::PersistedProgressRecord;
use tracing::debug;

use super::SqliteRepository;
use super::mapping::{id_i64, map_progress_row, ser, to_json, usize_i64};
use crate::repository::{ProgressKey, ProgressRepository, StorageError};

const SELECT_COLUMNS: &str = r"
    SELECT
        learner_id, quiz_id, attempt_number, cursor, status,
        started_at, last_activity_at, saved_at,
        captured_answers, attempt_data, lesson_progress, video_progress, version
    FROM quiz_progress
    WHERE learner_id = ?1 AND quiz_id = ?2
";

fn key_params(key: ProgressKey) -> Result<(i64, i64), StorageError> {
    Ok((
        id_i64("learner_id", key.learner_id.value())?,
        id_i64("quiz_id", key.quiz_id.value())?,
    ))
}

#[async_trait]
impl ProgressRepository for SqliteRepository {
    async fn load(&self, key: ProgressKey) -> Result<Option<PersistedProgressRecord>, StorageError> {
        let (learner, quiz) = key_params(key)?;
        let sql = format!("{SELECT_COLUMNS} ORDER BY attempt_number DESC LIMIT 1");

        let row = sqlx::query(&sql)
            .bind(learner)
            .bind(quiz)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        row.as_ref().map(map_progress_row).transpose()
    }

    async fn save(&self, key: ProgressKey, record: &PersistedProgressRecord) -> Result<(), StorageError> {
        if record.learner_id != key.learner_id || record.quiz_id != key.quiz_id {
            return Err(StorageError::KeyMismatch {
                learner: record.learner_id,
                quiz: record.quiz_id,
            });
        }
        let (learner, quiz) = key_params(key)?;
        let version = i64::try_from(record.version).map_err(ser)?;

        // The WHERE on the update arm turns a stale write into a no-op, which
        // is reported as a conflict below.
        let res = sqlx::query(
            r"
                INSERT INTO quiz_progress (
                    learner_id, quiz_id, attempt_number, cursor, status,
                    started_at, last_activity_at, saved_at,
                    captured_answers, attempt_data, lesson_progress, video_progress, version
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(learner_id, quiz_id, attempt_number) DO UPDATE SET
                    cursor = excluded.cursor,
                    status = excluded.status,
                    started_at = excluded.started_at,
                    last_activity_at = excluded.last_activity_at,
                    saved_at = excluded.saved_at,
                    captured_answers = excluded.captured_answers,
                    attempt_data = excluded.attempt_data,
                    lesson_progress = excluded.lesson_progress,
                    video_progress = excluded.video_progress,
                    version = excluded.version
                WHERE quiz_progress.version < excluded.version
            ",
        )
        .bind(learner)
        .bind(quiz)
        .bind(i64::from(record.attempt_number))
        .bind(usize_i64("cursor", record.cursor)?)
        .bind(record.status.as_str())
        .bind(record.started_at)
        .bind(record.last_activity_at)
        .bind(record.saved_at)
        .bind(to_json(&record.captured_answers)?)
        .bind(record.attempt_data.as_ref().map(to_json).transpose()?)
        .bind(to_json(&record.lesson_progress)?)
        .bind(to_json(&record.video_progress)?)
        .bind(version)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        if res.rows_affected() == 0 {
            debug!(%key, attempt = record.attempt_number, version = record.version, "rejected stale progress write");
            return Err(StorageError::Conflict);
        }
        Ok(())
    }

    async fn delete(&self, key: ProgressKey, attempt_number: u32) -> Result<(), StorageError> {
        let (learner, quiz) = key_params(key)?;
        sqlx::query(
            r"
                DELETE FROM quiz_progress
                WHERE learner_id = ?1 AND quiz_id = ?2 AND attempt_number = ?3
            ",
        )
        .bind(learner)
        .bind(quiz)
        .bind(i64::from(attempt_number))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn history(&self, key: ProgressKey) -> Result<Vec<PersistedProgressRecord>, StorageError> {
        let (learner, quiz) = key_params(key)?;
        let sql = format!("{SELECT_COLUMNS} ORDER BY attempt_number ASC");

        let rows = sqlx::query(&sql)
            .bind(learner)
            .bind(quiz)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(map_progress_row(row)?);
        }
        Ok(out)
    }
}
