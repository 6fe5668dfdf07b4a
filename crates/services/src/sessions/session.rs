use std::sync::Arc;

use tokio::sync::watch;

use quiz_core::model::{
    AttemptState, LearnerId, Question, QuizDefinition, RemainingAttempts,
};

use super::controller::SubmissionOutcome;
use super::progress::SessionProgress;
use crate::persistence::{ProgressPersistence, SaveStatus};

/// One learner working through one quiz.
///
/// Owns the in-memory attempt, which is authoritative, and the persistence port
/// that mirrors it. All transitions go through `QuizSessionService`.
#[derive(Debug)]
pub struct QuizSession {
    pub(super) learner_id: LearnerId,
    pub(super) quiz: Arc<QuizDefinition>,
    pub(super) attempt: AttemptState,
    pub(super) persistence: ProgressPersistence,
    pub(super) resumed: bool,
    pub(super) completion_emitted: bool,
    pub(super) last_submission: Option<SubmissionOutcome>,
}

impl QuizSession {
    pub(super) fn new(
        learner_id: LearnerId,
        quiz: Arc<QuizDefinition>,
        attempt: AttemptState,
        persistence: ProgressPersistence,
        resumed: bool,
    ) -> Self {
        Self {
            learner_id,
            quiz,
            attempt,
            persistence,
            resumed,
            completion_emitted: false,
            last_submission: None,
        }
    }

    #[must_use]
    pub fn learner_id(&self) -> LearnerId {
        self.learner_id
    }

    #[must_use]
    pub fn quiz(&self) -> &QuizDefinition {
        &self.quiz
    }

    #[must_use]
    pub fn attempt(&self) -> &AttemptState {
        &self.attempt
    }

    #[must_use]
    pub fn attempt_number(&self) -> u32 {
        self.attempt.attempt_number()
    }

    /// True if the attempt was restored from saved progress.
    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    #[must_use]
    pub fn is_submitted(&self) -> bool {
        self.attempt.is_submitted()
    }

    /// Question under the cursor; `None` once submitted.
    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        if self.attempt.is_submitted() {
            return None;
        }
        self.quiz.question_at(self.attempt.cursor())
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        SessionProgress::of(&self.attempt, &self.quiz)
    }

    /// Attempts left counting the current one as used once it is submitted.
    #[must_use]
    pub fn remaining_attempts(&self) -> RemainingAttempts {
        let used = if self.attempt.is_submitted() {
            self.attempt.attempt_number()
        } else {
            self.attempt.attempt_number().saturating_sub(1)
        };
        self.quiz.max_attempts.remaining_after(used)
    }

    #[must_use]
    pub fn last_submission(&self) -> Option<&SubmissionOutcome> {
        self.last_submission.as_ref()
    }

    #[must_use]
    pub fn save_status(&self) -> SaveStatus {
        self.persistence.status()
    }

    #[must_use]
    pub fn subscribe_save_status(&self) -> watch::Receiver<SaveStatus> {
        self.persistence.subscribe_status()
    }

    #[must_use]
    pub fn persistence(&self) -> &ProgressPersistence {
        &self.persistence
    }
}
