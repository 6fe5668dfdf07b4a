use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    AttemptError, AttemptState, AttemptStatus, LearnerId, QuestionId, QuizDefinition, QuizId,
    ScoreResult, SubmittedAnswer,
};

//
// ─── AUXILIARY PROGRESS ────────────────────────────────────────────────────────
//

/// Completion of a lesson that sits alongside the quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgress {
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Playback position within a lesson video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoProgress {
    pub position_secs: u32,
    pub watched_percent: u8,
}

/// Final outcome written once, at submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSnapshot {
    pub score: u8,
    pub passed: bool,
    pub attempt_count: u32,
    pub correct_count: u32,
    pub total_count: u32,
    pub xp_earned: u32,
    pub submitted_at: DateTime<Utc>,
}

impl AttemptSnapshot {
    #[must_use]
    pub fn from_score(score: &ScoreResult, attempt_count: u32, submitted_at: DateTime<Utc>) -> Self {
        Self {
            score: score.percentage(),
            passed: score.passed(),
            attempt_count,
            correct_count: score.correct_count(),
            total_count: score.total_count(),
            xp_earned: score.xp_earned(),
            submitted_at,
        }
    }
}

//
// ─── PERSISTED RECORD ──────────────────────────────────────────────────────────
//

/// Durable shape of one attempt's progress.
///
/// `version` increases by one on every write; storage rejects writes that do
/// not move it forward, so a stale tab cannot overwrite a newer record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedProgressRecord {
    pub learner_id: LearnerId,
    pub quiz_id: QuizId,
    pub attempt_number: u32,
    pub cursor: usize,
    #[serde(default)]
    pub captured_answers: BTreeMap<QuestionId, SubmittedAnswer>,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_data: Option<AttemptSnapshot>,
    #[serde(default)]
    pub lesson_progress: BTreeMap<String, LessonProgress>,
    #[serde(default)]
    pub video_progress: BTreeMap<String, VideoProgress>,
    #[serde(default)]
    pub version: u64,
}

impl PersistedProgressRecord {
    /// Fresh, never-written record mirroring `attempt`.
    #[must_use]
    pub fn for_attempt(learner_id: LearnerId, attempt: &AttemptState) -> Self {
        Self {
            learner_id,
            quiz_id: attempt.quiz_id(),
            attempt_number: attempt.attempt_number(),
            cursor: attempt.cursor(),
            captured_answers: attempt.captured_answers().clone(),
            status: attempt.status(),
            started_at: attempt.started_at(),
            last_activity_at: attempt.last_activity_at(),
            saved_at: None,
            attempt_data: None,
            lesson_progress: BTreeMap::new(),
            video_progress: BTreeMap::new(),
            version: 0,
        }
    }

    #[must_use]
    pub fn is_submitted(&self) -> bool {
        self.status == AttemptStatus::Submitted
    }

    /// Field-wise replacement, except the three progress maps which merge by key.
    pub fn apply(&mut self, patch: &ProgressPatch) {
        if let Some(n) = patch.attempt_number {
            self.attempt_number = n;
        }
        if let Some(cursor) = patch.cursor {
            self.cursor = cursor;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(at) = patch.started_at {
            self.started_at = at;
        }
        if let Some(at) = patch.last_activity_at {
            self.last_activity_at = at;
        }
        if let Some(data) = &patch.attempt_data {
            self.attempt_data = Some(data.clone());
        }
        merge_map(&mut self.captured_answers, &patch.captured_answers);
        merge_map(&mut self.lesson_progress, &patch.lesson_progress);
        merge_map(&mut self.video_progress, &patch.video_progress);
    }

    /// Rebuild the in-memory attempt for an in-progress record.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::AttemptAlreadySubmitted` for submitted records and
    /// `AttemptError::InvalidPersistedState` if the record does not fit `quiz`.
    pub fn to_attempt(&self, quiz: &QuizDefinition) -> Result<AttemptState, AttemptError> {
        if self.is_submitted() {
            return Err(AttemptError::AttemptAlreadySubmitted);
        }
        if self.quiz_id != quiz.id {
            return Err(AttemptError::InvalidPersistedState(format!(
                "record belongs to quiz {}, not {}",
                self.quiz_id, quiz.id
            )));
        }
        AttemptState::from_persisted(
            quiz,
            self.attempt_number,
            self.cursor,
            self.captured_answers.clone(),
            self.started_at,
            self.last_activity_at,
        )
    }
}

fn merge_map<K: Ord + Clone, V: Clone>(into: &mut BTreeMap<K, V>, from: &BTreeMap<K, V>) {
    for (k, v) in from {
        into.insert(k.clone(), v.clone());
    }
}

//
// ─── PATCH ─────────────────────────────────────────────────────────────────────
//

/// Partial update to a `PersistedProgressRecord`.
///
/// Unset fields and empty maps leave the record unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AttemptStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_data: Option<AttemptSnapshot>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub captured_answers: BTreeMap<QuestionId, SubmittedAnswer>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lesson_progress: BTreeMap<String, LessonProgress>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub video_progress: BTreeMap<String, VideoProgress>,
}

impl ProgressPatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Position-only patch: cursor, status and activity time of `attempt`.
    #[must_use]
    pub fn position(attempt: &AttemptState) -> Self {
        Self {
            attempt_number: Some(attempt.attempt_number()),
            cursor: Some(attempt.cursor()),
            status: Some(attempt.status()),
            last_activity_at: Some(attempt.last_activity_at()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_answer(mut self, id: QuestionId, answer: SubmittedAnswer) -> Self {
        self.captured_answers.insert(id, answer);
        self
    }

    #[must_use]
    pub fn with_attempt_data(mut self, data: AttemptSnapshot) -> Self {
        self.attempt_data = Some(data);
        self
    }

    #[must_use]
    pub fn with_lesson(mut self, lesson_id: impl Into<String>, progress: LessonProgress) -> Self {
        self.lesson_progress.insert(lesson_id.into(), progress);
        self
    }

    #[must_use]
    pub fn with_video(mut self, video_id: impl Into<String>, progress: VideoProgress) -> Self {
        self.video_progress.insert(video_id.into(), progress);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fold a later patch into this one; the later value wins per field and per map key.
    pub fn merge(&mut self, later: ProgressPatch) {
        let ProgressPatch {
            attempt_number,
            cursor,
            status,
            started_at,
            last_activity_at,
            attempt_data,
            captured_answers,
            lesson_progress,
            video_progress,
        } = later;

        self.attempt_number = attempt_number.or(self.attempt_number);
        self.cursor = cursor.or(self.cursor);
        self.status = status.or(self.status);
        self.started_at = started_at.or(self.started_at);
        self.last_activity_at = last_activity_at.or(self.last_activity_at);
        self.attempt_data = attempt_data.or(self.attempt_data.take());
        self.captured_answers.extend(captured_answers);
        self.lesson_progress.extend(lesson_progress);
        self.video_progress.extend(video_progress);
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
