use quiz_core::model::{
    AnswerKey, AttemptSnapshot, AttemptState, AttemptStatus, LearnerId, LessonProgress, MaxAttempts,
    PersistedProgressRecord, ProgressPatch, Question, QuestionId, QuizDefinition, QuizId,
    SubmittedAnswer, VideoProgress,
};
use quiz_core::time::fixed_now;
use storage::repository::{ProgressKey, ProgressRepository, StorageError};
use storage::sqlite::SqliteRepository;

fn quiz() -> QuizDefinition {
    QuizDefinition::new(
        QuizId::new(5),
        vec![
            Question::new("q1", AnswerKey::SingleChoice { correct_index: 0 }),
            Question::new("q2", AnswerKey::MultiSelect { correct_indices: vec![0, 2] }),
        ],
        60,
        MaxAttempts::limited(3).unwrap(),
    )
}

fn key() -> ProgressKey {
    ProgressKey::new(LearnerId::new(11), QuizId::new(5))
}

fn record(attempt_number: u32, version: u64) -> PersistedProgressRecord {
    let attempt = AttemptState::start(&quiz(), attempt_number, fixed_now()).unwrap();
    let mut record = PersistedProgressRecord::for_attempt(LearnerId::new(11), &attempt);
    record.version = version;
    record.saved_at = Some(fixed_now());
    record
}

async fn connect(name: &str) -> SqliteRepository {
    let repo = SqliteRepository::connect(&format!("sqlite:file:{name}?mode=memory&cache=shared"))
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

#[tokio::test]
async fn sqlite_round_trips_full_record() {
    let repo = connect("memdb_progress_roundtrip").await;

    let mut rec = record(1, 1);
    rec.apply(
        &ProgressPatch::new()
            .with_answer(QuestionId::new("q1"), SubmittedAnswer::SingleChoice(0))
            .with_answer(QuestionId::new("q2"), SubmittedAnswer::MultiSelect(vec![0, 2]))
            .with_lesson("intro", LessonProgress { completed: true, completed_at: Some(fixed_now()) })
            .with_video("intro-video", VideoProgress { position_secs: 120, watched_percent: 80 }),
    );
    rec.status = AttemptStatus::Submitted;
    rec.attempt_data = Some(AttemptSnapshot {
        score: 100,
        passed: true,
        attempt_count: 1,
        correct_count: 2,
        total_count: 2,
        xp_earned: 20,
        submitted_at: fixed_now(),
    });

    repo.save(key(), &rec).await.expect("save");
    let loaded = repo.load(key()).await.expect("load").expect("present");

    assert_eq!(loaded, rec);
}

#[tokio::test]
async fn sqlite_rejects_stale_versions() {
    let repo = connect("memdb_progress_versions").await;

    repo.save(key(), &record(1, 2)).await.unwrap();
    let err = repo.save(key(), &record(1, 2)).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict));
    let err = repo.save(key(), &record(1, 1)).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict));

    repo.save(key(), &record(1, 3)).await.unwrap();
    assert_eq!(repo.load(key()).await.unwrap().unwrap().version, 3);
}

#[tokio::test]
async fn sqlite_history_accumulates_and_delete_targets_one_attempt() {
    let repo = connect("memdb_progress_history").await;

    let mut first = record(1, 1);
    first.status = AttemptStatus::Submitted;
    repo.save(key(), &first).await.unwrap();
    repo.save(key(), &record(2, 1)).await.unwrap();

    let history = repo.history(key()).await.unwrap();
    assert_eq!(history.iter().map(|r| r.attempt_number).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(repo.load(key()).await.unwrap().unwrap().attempt_number, 2);

    repo.delete(key(), 2).await.unwrap();
    let latest = repo.load(key()).await.unwrap().unwrap();
    assert_eq!(latest.attempt_number, 1);
    assert!(latest.is_submitted());

    let other = ProgressKey::new(LearnerId::new(12), QuizId::new(5));
    assert!(repo.load(other).await.unwrap().is_none());
    assert!(repo.history(other).await.unwrap().is_empty());
}
