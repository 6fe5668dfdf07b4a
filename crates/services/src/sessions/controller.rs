use std::sync::Arc;

use tracing::{debug, info, warn};

use quiz_core::Clock;
use quiz_core::model::{
    Advance, AttemptError, AttemptSnapshot, AttemptState, LearnerId, LessonProgress,
    PersistedProgressRecord, ProgressPatch, QuestionId, QuizDefinition, RemainingAttempts,
    RemediationSuggestion, ScoreResult, SubmittedAnswer, VideoProgress,
};
use quiz_core::remediation::{Feedback, FeedbackContext, RemediationPlanner, compose_feedback};
use storage::repository::{ProgressKey, ProgressRepository};

use super::session::QuizSession;
use crate::config::EngineConfig;
use crate::error::{PersistenceError, SessionError};
use crate::events::{CompletionEvent, EventBus};
use crate::interrupt::InterruptHub;
use crate::persistence::{ProgressPersistence, SaveOptions, SaveOutcome};

/// Everything the learner sees after submitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub score: ScoreResult,
    pub feedback: Feedback,
    /// Empty for passing attempts.
    pub remediation: Vec<RemediationSuggestion>,
    /// Set only for a passing attempt.
    pub completion: Option<CompletionEvent>,
    pub remaining: RemainingAttempts,
}

/// Result of `QuizSessionService::advance`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Moved { cursor: usize },
    Submitted(SubmissionOutcome),
}

/// Orchestrates quiz sessions: attempt transitions, progress saves, scoring,
/// feedback, remediation and completion events.
///
/// Persistence failures are logged and shown on the session's save-status
/// channel; they never fail a transition.
#[derive(Clone)]
pub struct QuizSessionService {
    clock: Clock,
    config: EngineConfig,
    progress: Arc<dyn ProgressRepository>,
    events: Arc<dyn EventBus>,
    planner: Arc<RemediationPlanner>,
    interrupts: Option<Arc<InterruptHub>>,
}

impl QuizSessionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        progress: Arc<dyn ProgressRepository>,
        events: Arc<dyn EventBus>,
        planner: RemediationPlanner,
    ) -> Self {
        Self {
            clock,
            config: EngineConfig::default(),
            progress,
            events,
            planner: Arc::new(planner),
            interrupts: None,
        }
    }

    /// Apply save policy, debounce interval and suggestion cap.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        let planner = self
            .planner
            .as_ref()
            .clone()
            .with_max_suggestions(config.max_remediation_suggestions);
        self.planner = Arc::new(planner);
        self.config = config;
        self
    }

    /// Flush every opened session when `hub` raises an interruption.
    #[must_use]
    pub fn with_interrupts(mut self, hub: Arc<InterruptHub>) -> Self {
        self.interrupts = Some(hub);
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load saved progress and resume it, or start the next attempt.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Persistence` if saved progress cannot be read and
    /// `AttemptError::AttemptLimitExceeded` when no attempts remain.
    pub async fn open(
        &self,
        learner_id: LearnerId,
        quiz: Arc<QuizDefinition>,
    ) -> Result<QuizSession, SessionError> {
        let key = ProgressKey::new(learner_id, quiz.id);
        let persistence =
            ProgressPersistence::new(key, Arc::clone(&self.progress), self.clock.clone(), &self.config);
        if let Some(hub) = &self.interrupts {
            persistence.attach(hub);
        }

        let latest = persistence.load().await?;
        let next_attempt = match &latest {
            Some(record) if !record.is_submitted() => match record.to_attempt(&quiz) {
                Ok(attempt) => {
                    info!(
                        learner = %learner_id,
                        quiz = %quiz.id,
                        attempt = attempt.attempt_number(),
                        cursor = attempt.cursor(),
                        "resuming attempt"
                    );
                    return Ok(QuizSession::new(learner_id, quiz, attempt, persistence, true));
                }
                Err(err) => {
                    warn!(
                        learner = %learner_id,
                        quiz = %quiz.id,
                        attempt = record.attempt_number,
                        error = %err,
                        "saved attempt does not fit the quiz; starting it over"
                    );
                    record.attempt_number
                }
            },
            Some(record) => {
                let history = persistence.history().await?;
                let submitted = u32::try_from(history.iter().filter(|r| r.is_submitted()).count())
                    .unwrap_or(u32::MAX);
                submitted.max(record.attempt_number).saturating_add(1)
            }
            None => 1,
        };

        let attempt = AttemptState::start(&quiz, next_attempt, self.clock.now())?;
        note_save(
            persistence
                .begin_attempt(PersistedProgressRecord::for_attempt(learner_id, &attempt))
                .await,
        );
        Ok(QuizSession::new(learner_id, quiz, attempt, persistence, false))
    }

    /// Record an answer for a question at or before the cursor.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError` if the attempt is submitted, the question is
    /// unknown or it has not been reached yet.
    pub async fn capture_answer(
        &self,
        session: &mut QuizSession,
        question_id: &QuestionId,
        answer: SubmittedAnswer,
    ) -> Result<(), SessionError> {
        let now = self.clock.now();
        if let Err(err) = session
            .attempt
            .capture_answer(&session.quiz, question_id, answer.clone(), now)
        {
            return Err(rejected(session, err));
        }

        let patch = ProgressPatch::position(&session.attempt).with_answer(question_id.clone(), answer);
        note_save(session.persistence.request_save(patch, SaveOptions::default()).await);
        Ok(())
    }

    /// Capture an ordering answer given as display positions.
    ///
    /// `display_order[p]` is the original index of the option shown at
    /// position `p`. Out-of-range positions are kept as-is and score zero.
    ///
    /// # Errors
    ///
    /// Same as `capture_answer`.
    pub async fn capture_ordering(
        &self,
        session: &mut QuizSession,
        question_id: &QuestionId,
        display_order: &[usize],
        arranged: &[usize],
    ) -> Result<(), SessionError> {
        let answer = SubmittedAnswer::ordering_from_display(display_order, arranged)
            .unwrap_or_else(|| SubmittedAnswer::Ordering(arranged.to_vec()));
        self.capture_answer(session, question_id, answer).await
    }

    /// Move forward; on the last question this submits.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::AnswerRequired` if the current question is
    /// unanswered, or `AttemptAlreadySubmitted`.
    pub async fn advance(&self, session: &mut QuizSession) -> Result<StepOutcome, SessionError> {
        let now = self.clock.now();
        match session.attempt.advance(&session.quiz, now) {
            Ok(Advance::Moved { cursor }) => {
                let patch = ProgressPatch::position(&session.attempt);
                note_save(session.persistence.request_save(patch, SaveOptions::default()).await);
                Ok(StepOutcome::Moved { cursor })
            }
            Ok(Advance::Submitted(score)) => Ok(StepOutcome::Submitted(self.finish(session, score).await)),
            Err(err) => Err(rejected(session, err)),
        }
    }

    /// Step back one question.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::AttemptAlreadySubmitted` after submission.
    pub async fn retreat(&self, session: &mut QuizSession) -> Result<usize, SessionError> {
        let now = self.clock.now();
        let cursor = match session.attempt.retreat(now) {
            Ok(cursor) => cursor,
            Err(err) => return Err(rejected(session, err)),
        };
        let patch = ProgressPatch::position(&session.attempt);
        note_save(session.persistence.request_save(patch, SaveOptions::default()).await);
        Ok(cursor)
    }

    /// Score the attempt and close it. Unanswered questions score zero.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::AttemptAlreadySubmitted` if called twice.
    pub async fn submit(&self, session: &mut QuizSession) -> Result<SubmissionOutcome, SessionError> {
        let now = self.clock.now();
        match session.attempt.submit(&session.quiz, now) {
            Ok(score) => Ok(self.finish(session, score).await),
            Err(err) => Err(rejected(session, err)),
        }
    }

    /// Start the next attempt after a submission.
    ///
    /// The submitted attempt must be durable first, so its final save is
    /// retried here.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AttemptInProgress` before submission,
    /// `AttemptError::AttemptLimitExceeded` when no attempts remain and
    /// `SessionError::Persistence` if the submitted attempt still cannot be
    /// saved. The session is unchanged in every case.
    pub async fn retry(&self, session: &mut QuizSession) -> Result<(), SessionError> {
        if !session.attempt.is_submitted() {
            return Err(SessionError::AttemptInProgress);
        }
        let next = session.attempt.attempt_number() + 1;
        let attempt = AttemptState::start(&session.quiz, next, self.clock.now())?;

        if let Err(err) = session.persistence.flush().await {
            warn!(
                learner = %session.learner_id,
                quiz = %session.quiz.id,
                attempt = session.attempt.attempt_number(),
                error = %err,
                "retry refused until the submitted attempt is saved"
            );
            return Err(err.into());
        }
        note_save(
            session
                .persistence
                .begin_attempt(PersistedProgressRecord::for_attempt(session.learner_id, &attempt))
                .await,
        );
        session.attempt = attempt;
        session.resumed = false;
        session.completion_emitted = false;
        session.last_submission = None;
        Ok(())
    }

    /// Throw away the in-progress attempt and start it again from question 0.
    ///
    /// # Errors
    ///
    /// Returns `AttemptAlreadySubmitted` after submission and
    /// `SessionError::Persistence` if the saved attempt cannot be deleted.
    pub async fn restart(&self, session: &mut QuizSession) -> Result<(), SessionError> {
        if session.attempt.is_submitted() {
            return Err(rejected(session, AttemptError::AttemptAlreadySubmitted));
        }
        session.persistence.clear().await?;

        let attempt = AttemptState::start(&session.quiz, session.attempt.attempt_number(), self.clock.now())?;
        note_save(
            session
                .persistence
                .begin_attempt(PersistedProgressRecord::for_attempt(session.learner_id, &attempt))
                .await,
        );
        session.attempt = attempt;
        session.resumed = false;
        Ok(())
    }

    /// Leave the quiz for good. An in-progress attempt's saved progress is
    /// deleted; submitted attempts stay in history.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Persistence` if the delete fails.
    pub async fn abandon(&self, session: QuizSession) -> Result<(), SessionError> {
        if !session.attempt.is_submitted() {
            session.persistence.clear().await?;
            info!(
                learner = %session.learner_id,
                quiz = %session.quiz.id,
                attempt = session.attempt.attempt_number(),
                "attempt abandoned"
            );
        }
        Ok(())
    }

    /// Write any buffered progress and end the session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Persistence` if the final write fails.
    pub async fn close(&self, session: QuizSession) -> Result<(), SessionError> {
        session.persistence.flush().await?;
        Ok(())
    }

    /// Save lesson completion next to the quiz progress.
    pub async fn record_lesson_progress(
        &self,
        session: &QuizSession,
        lesson_id: &str,
        progress: LessonProgress,
    ) {
        let patch = ProgressPatch::new().with_lesson(lesson_id, progress);
        note_save(session.persistence.request_save(patch, SaveOptions::default()).await);
    }

    /// Save a video playback position next to the quiz progress.
    pub async fn record_video_progress(
        &self,
        session: &QuizSession,
        video_id: &str,
        progress: VideoProgress,
    ) {
        let patch = ProgressPatch::new().with_video(video_id, progress);
        note_save(session.persistence.request_save(patch, SaveOptions::default()).await);
    }

    async fn finish(&self, session: &mut QuizSession, score: ScoreResult) -> SubmissionOutcome {
        let now = self.clock.now();
        let attempt_number = session.attempt.attempt_number();

        let mut patch = ProgressPatch::position(&session.attempt)
            .with_attempt_data(AttemptSnapshot::from_score(&score, attempt_number, now));
        for (id, answer) in session.attempt.captured_answers() {
            patch = patch.with_answer(id.clone(), answer.clone());
        }
        note_save(session.persistence.request_save(patch, SaveOptions::immediate()).await);

        let remaining = session.quiz.max_attempts.remaining_after(attempt_number);
        let feedback = compose_feedback(&FeedbackContext::from_score(
            &score,
            session.quiz.passing_score,
            attempt_number,
            remaining,
        ));
        let remediation = if score.passed() {
            Vec::new()
        } else {
            self.planner.plan(&session.quiz, &score)
        };

        let mut completion = None;
        if score.passed() && !session.completion_emitted {
            let event = CompletionEvent {
                learner_id: session.learner_id,
                quiz_id: session.quiz.id,
                attempt_number,
                score: score.percentage(),
                xp_earned: score.xp_earned(),
            };
            self.events.publish(event.clone()).await;
            session.completion_emitted = true;
            completion = Some(event);
        }

        info!(
            learner = %session.learner_id,
            quiz = %session.quiz.id,
            attempt = attempt_number,
            score = score.percentage(),
            passed = score.passed(),
            suggestions = remediation.len(),
            "attempt submitted"
        );

        let outcome = SubmissionOutcome {
            score,
            feedback,
            remediation,
            completion,
            remaining,
        };
        session.last_submission = Some(outcome.clone());
        outcome
    }
}

fn rejected(session: &QuizSession, err: AttemptError) -> SessionError {
    if err == AttemptError::AttemptAlreadySubmitted {
        warn!(
            learner = %session.learner_id,
            quiz = %session.quiz.id,
            attempt = session.attempt.attempt_number(),
            "action on a submitted attempt ignored"
        );
    }
    err.into()
}

// The port already logged the failure and updated the save status.
fn note_save(result: Result<SaveOutcome, PersistenceError>) {
    if let Err(err) = result {
        debug!(error = %err, "continuing without durable progress");
    }
}
