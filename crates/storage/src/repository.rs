use async_trait::async_trait;
use quiz_core::model::{LearnerId, PersistedProgressRecord, QuizId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    /// The stored record is at the same or a newer version than the write.
    #[error("conflict")]
    Conflict,

    #[error("record for learner {learner}/quiz {quiz} saved under a different key")]
    KeyMismatch { learner: LearnerId, quiz: QuizId },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Storage key for a learner's progress on one quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgressKey {
    pub learner_id: LearnerId,
    pub quiz_id: QuizId,
}

impl ProgressKey {
    #[must_use]
    pub fn new(learner_id: LearnerId, quiz_id: QuizId) -> Self {
        Self {
            learner_id,
            quiz_id,
        }
    }

    fn matches(&self, record: &PersistedProgressRecord) -> bool {
        self.learner_id == record.learner_id && self.quiz_id == record.quiz_id
    }
}

impl fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.learner_id, self.quiz_id)
    }
}

/// Repository contract for quiz progress.
///
/// Each attempt is stored separately under `(key, attempt_number)`, so history
/// accumulates and nothing is removed unless `delete` is called.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Fetch the record of the most recent attempt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on connection or decoding failures.
    async fn load(&self, key: ProgressKey) -> Result<Option<PersistedProgressRecord>, StorageError>;

    /// Insert or replace the record for `record.attempt_number`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the stored record's version is not
    /// older than `record.version`, and `StorageError::KeyMismatch` if the
    /// record belongs to another learner or quiz.
    async fn save(&self, key: ProgressKey, record: &PersistedProgressRecord) -> Result<(), StorageError>;

    /// Remove a single attempt's record. Missing records are not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on connection failures.
    async fn delete(&self, key: ProgressKey, attempt_number: u32) -> Result<(), StorageError>;

    /// All attempts for `key`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on connection or decoding failures.
    async fn history(&self, key: ProgressKey) -> Result<Vec<PersistedProgressRecord>, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
///
/// Counts successful writes and can be told to fail them, which is what the
/// save-scheduling tests need to observe.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    records: Arc<Mutex<HashMap<ProgressKey, BTreeMap<u32, PersistedProgressRecord>>>>,
    writes: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make subsequent `save` calls fail with a connection error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<ProgressKey, BTreeMap<u32, PersistedProgressRecord>>>, StorageError>
    {
        self.records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn load(&self, key: ProgressKey) -> Result<Option<PersistedProgressRecord>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .get(&key)
            .and_then(|attempts| attempts.values().next_back())
            .cloned())
    }

    async fn save(&self, key: ProgressKey, record: &PersistedProgressRecord) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("writes disabled".into()));
        }
        if !key.matches(record) {
            return Err(StorageError::KeyMismatch {
                learner: record.learner_id,
                quiz: record.quiz_id,
            });
        }

        let mut guard = self.lock()?;
        let attempts = guard.entry(key).or_default();
        if let Some(existing) = attempts.get(&record.attempt_number) {
            if existing.version >= record.version {
                return Err(StorageError::Conflict);
            }
        }
        attempts.insert(record.attempt_number, record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: ProgressKey, attempt_number: u32) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if let Some(attempts) = guard.get_mut(&key) {
            attempts.remove(&attempt_number);
            if attempts.is_empty() {
                guard.remove(&key);
            }
        }
        Ok(())
    }

    async fn history(&self, key: ProgressKey) -> Result<Vec<PersistedProgressRecord>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .get(&key)
            .map(|attempts| attempts.values().cloned().collect())
            .unwrap_or_default())
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            progress: Arc::new(InMemoryRepository::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::model::{
        AnswerKey, AttemptState, AttemptStatus, MaxAttempts, Question, QuizDefinition,
    };
    use quiz_core::time::fixed_now;

    fn key() -> ProgressKey {
        ProgressKey::new(LearnerId::new(1), QuizId::new(2))
    }

    fn build_record(attempt_number: u32, version: u64) -> PersistedProgressRecord {
        let quiz = QuizDefinition::new(
            QuizId::new(2),
            vec![Question::new("q1", AnswerKey::SingleChoice { correct_index: 0 })],
            50,
            MaxAttempts::Unbounded,
        );
        let attempt = AttemptState::start(&quiz, attempt_number, fixed_now()).unwrap();
        let mut record = PersistedProgressRecord::for_attempt(LearnerId::new(1), &attempt);
        record.version = version;
        record
    }

    #[tokio::test]
    async fn load_returns_latest_attempt_and_history_keeps_all() {
        let repo = InMemoryRepository::new();
        let mut first = build_record(1, 1);
        first.status = AttemptStatus::Submitted;
        repo.save(key(), &first).await.unwrap();
        repo.save(key(), &build_record(2, 1)).await.unwrap();

        let latest = repo.load(key()).await.unwrap().unwrap();
        assert_eq!(latest.attempt_number, 2);

        let history = repo.history(key()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].attempt_number, 1);
        assert_eq!(repo.write_count(), 2);
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let repo = InMemoryRepository::new();
        repo.save(key(), &build_record(1, 3)).await.unwrap();

        let err = repo.save(key(), &build_record(1, 3)).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
        assert!(repo.save(key(), &build_record(1, 4)).await.is_ok());
    }

    #[tokio::test]
    async fn delete_removes_only_one_attempt() {
        let repo = InMemoryRepository::new();
        repo.save(key(), &build_record(1, 1)).await.unwrap();
        repo.save(key(), &build_record(2, 1)).await.unwrap();

        repo.delete(key(), 2).await.unwrap();
        repo.delete(key(), 7).await.unwrap();

        let latest = repo.load(key()).await.unwrap().unwrap();
        assert_eq!(latest.attempt_number, 1);
    }

    #[tokio::test]
    async fn save_rejects_foreign_records_and_injected_failures() {
        let repo = InMemoryRepository::new();
        let other = ProgressKey::new(LearnerId::new(99), QuizId::new(2));
        assert!(matches!(
            repo.save(other, &build_record(1, 1)).await.unwrap_err(),
            StorageError::KeyMismatch { .. }
        ));

        repo.set_fail_writes(true);
        assert!(matches!(
            repo.save(key(), &build_record(1, 1)).await.unwrap_err(),
            StorageError::Connection(_)
        ));
        assert_eq!(repo.write_count(), 0);
    }
}
