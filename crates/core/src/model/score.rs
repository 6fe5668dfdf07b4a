use serde::{Deserialize, Serialize};

/// Outcome of scoring a submitted attempt. Computed once by the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    correct_count: u32,
    total_count: u32,
    percentage: u8,
    passed: bool,
    per_question_correctness: Vec<bool>,
    xp_earned: u32,
}

impl ScoreResult {
    pub(crate) fn new(
        correct_count: u32,
        total_count: u32,
        percentage: u8,
        passed: bool,
        per_question_correctness: Vec<bool>,
        xp_earned: u32,
    ) -> Self {
        Self {
            correct_count,
            total_count,
            percentage,
            passed,
            per_question_correctness,
            xp_earned,
        }
    }

    #[must_use]
    pub fn correct_count(&self) -> u32 {
        self.correct_count
    }

    #[must_use]
    pub fn total_count(&self) -> u32 {
        self.total_count
    }

    /// Rounded score in `0..=100`.
    #[must_use]
    pub fn percentage(&self) -> u8 {
        self.percentage
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.passed
    }

    /// One entry per question, in quiz definition order.
    #[must_use]
    pub fn per_question_correctness(&self) -> &[bool] {
        &self.per_question_correctness
    }

    /// Indices of questions that were not fully correct.
    pub fn missed_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.per_question_correctness
            .iter()
            .enumerate()
            .filter_map(|(i, ok)| (!ok).then_some(i))
    }

    #[must_use]
    pub fn xp_earned(&self) -> u32 {
        self.xp_earned
    }
}
