use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::evaluator;
use crate::model::{QuestionId, QuizDefinition, QuizId, ScoreResult, SubmittedAnswer};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Errors raised by attempt transitions. A failed transition leaves the
/// attempt untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AttemptError {
    #[error("attempt {attempt_number} exceeds the limit of {max_attempts}")]
    AttemptLimitExceeded { attempt_number: u32, max_attempts: u32 },

    #[error("attempt has already been submitted")]
    AttemptAlreadySubmitted,

    #[error("attempt numbers start at 1")]
    InvalidAttemptNumber,

    #[error("question {0} is not part of this quiz")]
    UnknownQuestion(QuestionId),

    #[error("question {question} has not been reached (cursor at {cursor})")]
    QuestionNotReached { question: QuestionId, cursor: usize },

    #[error("question {0} must be answered before advancing")]
    AnswerRequired(QuestionId),

    #[error("invalid persisted attempt: {0}")]
    InvalidPersistedState(String),
}

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
}

impl AttemptStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in-progress",
            Self::Submitted => "submitted",
        }
    }
}

/// Result of `AttemptState::advance`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Cursor moved to the given question index.
    Moved { cursor: usize },
    /// The cursor was on the last question, so the attempt was submitted.
    Submitted(ScoreResult),
}

//
// ─── ATTEMPT STATE ─────────────────────────────────────────────────────────────
//

/// One learner's progress through one attempt at a quiz.
///
/// Transitions: `start` creates an in-progress attempt at question 0;
/// `capture_answer`, `advance` and `retreat` move within it; `submit` scores it
/// and is terminal. Retrying builds a new `AttemptState` with the next attempt
/// number instead of reusing a submitted one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptState {
    quiz_id: QuizId,
    attempt_number: u32,
    cursor: usize,
    captured_answers: BTreeMap<QuestionId, SubmittedAnswer>,
    status: AttemptStatus,
    started_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    score: Option<ScoreResult>,
}

impl AttemptState {
    /// Begin attempt `attempt_number` (1-based) of `quiz`.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::InvalidAttemptNumber` for attempt 0 and
    /// `AttemptError::AttemptLimitExceeded` past the quiz's `max_attempts`.
    pub fn start(
        quiz: &QuizDefinition,
        attempt_number: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, AttemptError> {
        if attempt_number == 0 {
            return Err(AttemptError::InvalidAttemptNumber);
        }
        if !quiz.max_attempts.permits(attempt_number) {
            return Err(AttemptError::AttemptLimitExceeded {
                attempt_number,
                max_attempts: Option::<u32>::from(quiz.max_attempts).unwrap_or(u32::MAX),
            });
        }

        Ok(Self {
            quiz_id: quiz.id,
            attempt_number,
            cursor: 0,
            captured_answers: BTreeMap::new(),
            status: AttemptStatus::InProgress,
            started_at: now,
            last_activity_at: now,
            score: None,
        })
    }

    /// Rehydrate an in-progress attempt from persisted progress.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::InvalidPersistedState` if the record does not fit
    /// the quiz (cursor out of range, zero attempt number, mismatched quiz).
    pub fn from_persisted(
        quiz: &QuizDefinition,
        attempt_number: u32,
        cursor: usize,
        captured_answers: BTreeMap<QuestionId, SubmittedAnswer>,
        started_at: DateTime<Utc>,
        last_activity_at: DateTime<Utc>,
    ) -> Result<Self, AttemptError> {
        if attempt_number == 0 {
            return Err(AttemptError::InvalidPersistedState("attempt number 0".into()));
        }
        if cursor > 0 && cursor >= quiz.len() {
            return Err(AttemptError::InvalidPersistedState(format!(
                "cursor {cursor} out of range for {} questions",
                quiz.len()
            )));
        }
        if let Some(unknown) = captured_answers.keys().find(|id| quiz.position_of(id).is_none()) {
            return Err(AttemptError::InvalidPersistedState(format!(
                "answer for unknown question {unknown}"
            )));
        }

        Ok(Self {
            quiz_id: quiz.id,
            attempt_number,
            cursor,
            captured_answers,
            status: AttemptStatus::InProgress,
            started_at,
            last_activity_at,
            score: None,
        })
    }

    #[must_use]
    pub fn quiz_id(&self) -> QuizId {
        self.quiz_id
    }

    #[must_use]
    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn captured_answers(&self) -> &BTreeMap<QuestionId, SubmittedAnswer> {
        &self.captured_answers
    }

    #[must_use]
    pub fn answer_for(&self, id: &QuestionId) -> Option<&SubmittedAnswer> {
        self.captured_answers.get(id)
    }

    #[must_use]
    pub fn status(&self) -> AttemptStatus {
        self.status
    }

    #[must_use]
    pub fn is_submitted(&self) -> bool {
        self.status == AttemptStatus::Submitted
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    /// Score computed at submission; `None` while in progress.
    #[must_use]
    pub fn score(&self) -> Option<&ScoreResult> {
        self.score.as_ref()
    }

    /// Record (or replace) the answer for `question_id`.
    ///
    /// Only questions at or before the cursor can be answered. The value is
    /// stored as given; a value of the wrong kind simply scores zero later.
    ///
    /// # Errors
    ///
    /// Returns `AttemptAlreadySubmitted`, `UnknownQuestion` or `QuestionNotReached`.
    pub fn capture_answer(
        &mut self,
        quiz: &QuizDefinition,
        question_id: &QuestionId,
        value: SubmittedAnswer,
        now: DateTime<Utc>,
    ) -> Result<(), AttemptError> {
        self.ensure_in_progress()?;
        let position = quiz
            .position_of(question_id)
            .ok_or_else(|| AttemptError::UnknownQuestion(question_id.clone()))?;
        if position > self.cursor {
            return Err(AttemptError::QuestionNotReached {
                question: question_id.clone(),
                cursor: self.cursor,
            });
        }

        self.captured_answers.insert(question_id.clone(), value);
        self.last_activity_at = now;
        Ok(())
    }

    /// Move to the next question, or submit when already on the last one.
    ///
    /// # Errors
    ///
    /// Returns `AttemptAlreadySubmitted`, or `AnswerRequired` if the current
    /// question has no captured answer.
    pub fn advance(&mut self, quiz: &QuizDefinition, now: DateTime<Utc>) -> Result<Advance, AttemptError> {
        self.ensure_in_progress()?;
        let Some(current) = quiz.question_at(self.cursor) else {
            return self.submit(quiz, now).map(Advance::Submitted);
        };
        if !self.captured_answers.contains_key(&current.id) {
            return Err(AttemptError::AnswerRequired(current.id.clone()));
        }

        if self.cursor + 1 >= quiz.len() {
            return self.submit(quiz, now).map(Advance::Submitted);
        }

        self.cursor += 1;
        self.last_activity_at = now;
        Ok(Advance::Moved { cursor: self.cursor })
    }

    /// Step back one question. Captured answers are kept.
    ///
    /// # Errors
    ///
    /// Returns `AttemptAlreadySubmitted` once the attempt is submitted.
    pub fn retreat(&mut self, now: DateTime<Utc>) -> Result<usize, AttemptError> {
        self.ensure_in_progress()?;
        if self.cursor > 0 {
            self.cursor -= 1;
            self.last_activity_at = now;
        }
        Ok(self.cursor)
    }

    /// Score every question and close the attempt.
    ///
    /// # Errors
    ///
    /// Returns `AttemptAlreadySubmitted` if called twice.
    pub fn submit(&mut self, quiz: &QuizDefinition, now: DateTime<Utc>) -> Result<ScoreResult, AttemptError> {
        self.ensure_in_progress()?;
        let result = evaluator::score_quiz(quiz, &self.captured_answers);
        self.status = AttemptStatus::Submitted;
        self.last_activity_at = now;
        self.score = Some(result.clone());
        Ok(result)
    }

    fn ensure_in_progress(&self) -> Result<(), AttemptError> {
        match self.status {
            AttemptStatus::InProgress => Ok(()),
            AttemptStatus::Submitted => Err(AttemptError::AttemptAlreadySubmitted),
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnswerKey, MaxAttempts, Question};
    use crate::time::fixed_now;

    fn quiz(max_attempts: MaxAttempts) -> QuizDefinition {
        QuizDefinition::new(
            QuizId::new(3),
            vec![
                Question::new("q1", AnswerKey::SingleChoice { correct_index: 0 }),
                Question::new("q2", AnswerKey::SingleChoice { correct_index: 1 }),
                Question::new("q3", AnswerKey::SingleChoice { correct_index: 2 }),
            ],
            70,
            max_attempts,
        )
    }

    fn qid(s: &str) -> QuestionId {
        QuestionId::new(s)
    }

    #[test]
    fn start_begins_at_first_question() {
        let quiz = quiz(MaxAttempts::Unbounded);
        let attempt = AttemptState::start(&quiz, 1, fixed_now()).unwrap();
        assert_eq!(attempt.cursor(), 0);
        assert_eq!(attempt.status(), AttemptStatus::InProgress);
        assert!(attempt.captured_answers().is_empty());
        assert!(attempt.score().is_none());
    }

    #[test]
    fn start_rejects_attempts_beyond_limit() {
        let quiz = quiz(MaxAttempts::limited(2).unwrap());
        assert!(AttemptState::start(&quiz, 2, fixed_now()).is_ok());
        let err = AttemptState::start(&quiz, 3, fixed_now()).unwrap_err();
        assert_eq!(
            err,
            AttemptError::AttemptLimitExceeded { attempt_number: 3, max_attempts: 2 }
        );
        assert_eq!(
            AttemptState::start(&quiz, 0, fixed_now()).unwrap_err(),
            AttemptError::InvalidAttemptNumber
        );
    }

    #[test]
    fn advance_requires_answer_and_moves_cursor() {
        let quiz = quiz(MaxAttempts::Unbounded);
        let now = fixed_now();
        let mut attempt = AttemptState::start(&quiz, 1, now).unwrap();

        assert_eq!(attempt.advance(&quiz, now).unwrap_err(), AttemptError::AnswerRequired(qid("q1")));

        attempt.capture_answer(&quiz, &qid("q1"), SubmittedAnswer::SingleChoice(0), now).unwrap();
        assert_eq!(attempt.advance(&quiz, now).unwrap(), Advance::Moved { cursor: 1 });
    }

    #[test]
    fn re_answering_overwrites_previous_value() {
        let quiz = quiz(MaxAttempts::Unbounded);
        let now = fixed_now();
        let mut attempt = AttemptState::start(&quiz, 1, now).unwrap();
        attempt.capture_answer(&quiz, &qid("q1"), SubmittedAnswer::SingleChoice(2), now).unwrap();
        attempt.capture_answer(&quiz, &qid("q1"), SubmittedAnswer::SingleChoice(0), now).unwrap();
        assert_eq!(attempt.answer_for(&qid("q1")), Some(&SubmittedAnswer::SingleChoice(0)));
    }

    #[test]
    fn capture_rejects_unknown_and_unreached_questions() {
        let quiz = quiz(MaxAttempts::Unbounded);
        let now = fixed_now();
        let mut attempt = AttemptState::start(&quiz, 1, now).unwrap();

        assert_eq!(
            attempt
                .capture_answer(&quiz, &qid("nope"), SubmittedAnswer::SingleChoice(0), now)
                .unwrap_err(),
            AttemptError::UnknownQuestion(qid("nope"))
        );
        assert!(matches!(
            attempt.capture_answer(&quiz, &qid("q3"), SubmittedAnswer::SingleChoice(0), now),
            Err(AttemptError::QuestionNotReached { cursor: 0, .. })
        ));
    }

    #[test]
    fn retreat_keeps_answers_and_stops_at_zero() {
        let quiz = quiz(MaxAttempts::Unbounded);
        let now = fixed_now();
        let mut attempt = AttemptState::start(&quiz, 1, now).unwrap();
        attempt.capture_answer(&quiz, &qid("q1"), SubmittedAnswer::SingleChoice(0), now).unwrap();
        attempt.advance(&quiz, now).unwrap();
        attempt.capture_answer(&quiz, &qid("q2"), SubmittedAnswer::SingleChoice(1), now).unwrap();

        assert_eq!(attempt.retreat(now).unwrap(), 0);
        assert_eq!(attempt.retreat(now).unwrap(), 0);
        assert_eq!(attempt.captured_answers().len(), 2);

        // Re-answering an earlier question after retreating is allowed.
        attempt.capture_answer(&quiz, &qid("q1"), SubmittedAnswer::SingleChoice(1), now).unwrap();
        assert_eq!(attempt.answer_for(&qid("q2")), Some(&SubmittedAnswer::SingleChoice(1)));
    }

    #[test]
    fn advance_on_last_question_submits() {
        let quiz = quiz(MaxAttempts::Unbounded);
        let now = fixed_now();
        let mut attempt = AttemptState::start(&quiz, 1, now).unwrap();
        for (id, value) in [("q1", 0), ("q2", 1), ("q3", 0)] {
            attempt.capture_answer(&quiz, &qid(id), SubmittedAnswer::SingleChoice(value), now).unwrap();
            if id != "q3" {
                attempt.advance(&quiz, now).unwrap();
            }
        }

        let Advance::Submitted(score) = attempt.advance(&quiz, now).unwrap() else {
            panic!("expected submission");
        };
        assert_eq!(score.percentage(), 67);
        assert!(!score.passed());
        assert!(attempt.is_submitted());
        assert_eq!(attempt.score(), Some(&score));
    }

    #[test]
    fn submitted_attempt_is_terminal() {
        let quiz = quiz(MaxAttempts::Unbounded);
        let now = fixed_now();
        let mut attempt = AttemptState::start(&quiz, 1, now).unwrap();
        attempt.capture_answer(&quiz, &qid("q1"), SubmittedAnswer::SingleChoice(0), now).unwrap();
        let score = attempt.submit(&quiz, now).unwrap();
        assert_eq!(score.correct_count(), 1);
        let before = attempt.clone();

        assert_eq!(
            attempt
                .capture_answer(&quiz, &qid("q1"), SubmittedAnswer::SingleChoice(1), now)
                .unwrap_err(),
            AttemptError::AttemptAlreadySubmitted
        );
        assert_eq!(attempt.advance(&quiz, now).unwrap_err(), AttemptError::AttemptAlreadySubmitted);
        assert_eq!(attempt.submit(&quiz, now).unwrap_err(), AttemptError::AttemptAlreadySubmitted);
        assert_eq!(attempt.retreat(now).unwrap_err(), AttemptError::AttemptAlreadySubmitted);
        assert_eq!(attempt, before);
    }

    #[test]
    fn from_persisted_validates_cursor_and_answers() {
        let quiz = quiz(MaxAttempts::Unbounded);
        let now = fixed_now();
        let answers = BTreeMap::from([(qid("q1"), SubmittedAnswer::SingleChoice(0))]);

        let attempt = AttemptState::from_persisted(&quiz, 2, 1, answers.clone(), now, now).unwrap();
        assert_eq!(attempt.cursor(), 1);
        assert_eq!(attempt.attempt_number(), 2);

        assert!(AttemptState::from_persisted(&quiz, 2, 3, answers, now, now).is_err());
        let bogus = BTreeMap::from([(qid("zz"), SubmittedAnswer::SingleChoice(0))]);
        assert!(AttemptState::from_persisted(&quiz, 2, 0, bogus, now, now).is_err());
    }
}
