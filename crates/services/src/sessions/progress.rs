use quiz_core::model::{AttemptState, QuizDefinition};

/// Aggregated view of attempt progress, useful for UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProgress {
    pub total: usize,
    pub answered: usize,
    pub remaining: usize,
    /// Index of the question on screen.
    pub cursor: usize,
    pub is_complete: bool,
}

impl SessionProgress {
    #[must_use]
    pub fn of(attempt: &AttemptState, quiz: &QuizDefinition) -> Self {
        let total = quiz.len();
        let answered = quiz
            .questions
            .iter()
            .filter(|q| attempt.answer_for(&q.id).is_some())
            .count();
        Self {
            total,
            answered,
            remaining: total - answered,
            cursor: attempt.cursor(),
            is_complete: attempt.is_submitted(),
        }
    }
}
