use quiz_core::model::{AttemptStatus, LearnerId, PersistedProgressRecord, QuizId};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn usize_i64(field: &'static str, v: usize) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn parse_status(s: &str) -> Result<AttemptStatus, StorageError> {
    match s {
        "in-progress" => Ok(AttemptStatus::InProgress),
        "submitted" => Ok(AttemptStatus::Submitted),
        _ => Err(StorageError::Serialization(format!("invalid status: {s}"))),
    }
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(ser)
}

fn from_json<T: DeserializeOwned>(field: &'static str, raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw)
        .map_err(|e| StorageError::Serialization(format!("invalid {field}: {e}")))
}

pub(crate) fn map_progress_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<PersistedProgressRecord, StorageError> {
    let learner_id = LearnerId::new(i64_to_u64(
        "learner_id",
        row.try_get::<i64, _>("learner_id").map_err(ser)?,
    )?);
    let quiz_id = QuizId::new(i64_to_u64(
        "quiz_id",
        row.try_get::<i64, _>("quiz_id").map_err(ser)?,
    )?);
    let attempt_number = u32::try_from(row.try_get::<i64, _>("attempt_number").map_err(ser)?)
        .map_err(|_| StorageError::Serialization("attempt_number out of range".into()))?;
    let cursor = usize::try_from(row.try_get::<i64, _>("cursor").map_err(ser)?)
        .map_err(|_| StorageError::Serialization("cursor out of range".into()))?;
    let status = parse_status(&row.try_get::<String, _>("status").map_err(ser)?)?;
    let version = i64_to_u64("version", row.try_get::<i64, _>("version").map_err(ser)?)?;

    let attempt_data = row
        .try_get::<Option<String>, _>("attempt_data")
        .map_err(ser)?
        .map(|raw| from_json("attempt_data", &raw))
        .transpose()?;

    Ok(PersistedProgressRecord {
        learner_id,
        quiz_id,
        attempt_number,
        cursor,
        captured_answers: from_json(
            "captured_answers",
            &row.try_get::<String, _>("captured_answers").map_err(ser)?,
        )?,
        status,
        started_at: row.try_get("started_at").map_err(ser)?,
        last_activity_at: row.try_get("last_activity_at").map_err(ser)?,
        saved_at: row.try_get("saved_at").map_err(ser)?,
        attempt_data,
        lesson_progress: from_json(
            "lesson_progress",
            &row.try_get::<String, _>("lesson_progress").map_err(ser)?,
        )?,
        video_progress: from_json(
            "video_progress",
            &row.try_get::<String, _>("video_progress").map_err(ser)?,
        )?,
        version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in [AttemptStatus::InProgress, AttemptStatus::Submitted] {
            assert_eq!(parse_status(status.as_str()).unwrap(), status);
        }
        assert!(parse_status("paused").is_err());
    }
}
