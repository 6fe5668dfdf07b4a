use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::evaluator::percentage_of;
use crate::model::{
    QuestionId, QuizDefinition, RemainingAttempts, RemediationSuggestion,
    ScoreResult, TopicTag,
};

//
// ─── CATALOG ───────────────────────────────────────────────────────────────────
//

/// Static mapping from questions (or their topic tags) to corrective content.
///
/// A question-level entry wins over a topic-level one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationCatalog {
    #[serde(default)]
    by_question: BTreeMap<QuestionId, RemediationSuggestion>,
    #[serde(default)]
    by_topic: BTreeMap<TopicTag, RemediationSuggestion>,
}

impl RemediationCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_question(mut self, id: impl Into<String>, suggestion: RemediationSuggestion) -> Self {
        self.by_question.insert(QuestionId::new(id), suggestion);
        self
    }

    #[must_use]
    pub fn with_topic(mut self, tag: impl Into<String>, suggestion: RemediationSuggestion) -> Self {
        self.by_topic.insert(TopicTag::new(tag), suggestion);
        self
    }

    #[must_use]
    pub fn lookup(&self, id: &QuestionId, topic: Option<&TopicTag>) -> Option<&RemediationSuggestion> {
        self.by_question
            .get(id)
            .or_else(|| topic.and_then(|t| self.by_topic.get(t)))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_question.is_empty() && self.by_topic.is_empty()
    }
}

//
// ─── PLANNER ───────────────────────────────────────────────────────────────────
//

/// Picks remediation for the questions a learner missed.
#[derive(Debug, Clone, Default)]
pub struct RemediationPlanner {
    catalog: RemediationCatalog,
    max_suggestions: Option<usize>,
}

impl RemediationPlanner {
    #[must_use]
    pub fn new(catalog: RemediationCatalog) -> Self {
        Self {
            catalog,
            max_suggestions: None,
        }
    }

    /// Cap the number of suggestions returned. `None` means unlimited.
    #[must_use]
    pub fn with_max_suggestions(mut self, max: Option<usize>) -> Self {
        self.max_suggestions = max;
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &RemediationCatalog {
        &self.catalog
    }

    /// Suggestions for every missed question, in quiz order.
    ///
    /// Deduplicated by resource id (first occurrence wins) and then capped. An
    /// empty result is normal: callers fall back to generic encouragement.
    #[must_use]
    pub fn plan(&self, quiz: &QuizDefinition, score: &ScoreResult) -> Vec<RemediationSuggestion> {
        let mut seen = HashSet::new();
        let limit = self.max_suggestions.unwrap_or(usize::MAX);

        score
            .missed_indices()
            .filter_map(|i| quiz.question_at(i))
            .filter_map(|q| self.catalog.lookup(&q.id, q.topic.as_ref()))
            .filter(|s| seen.insert(s.resource_id.clone()))
            .take(limit)
            .cloned()
            .collect()
    }
}

//
// ─── FEEDBACK ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedbackTone {
    Success,
    Encouraging,
    Final,
}

/// Inputs to constructive feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackContext {
    pub correct_count: u32,
    pub total_count: u32,
    /// Rounded score; carries scenario partial credit that counts alone cannot.
    pub percentage: u8,
    pub passing_score: u8,
    pub is_first_attempt: bool,
    pub remaining: RemainingAttempts,
}

impl FeedbackContext {
    /// Build from raw counts, deriving the percentage the same way scoring does.
    #[must_use]
    pub fn from_counts(
        correct_count: u32,
        total_count: u32,
        passing_score: u8,
        is_first_attempt: bool,
        remaining: RemainingAttempts,
    ) -> Self {
        Self {
            correct_count,
            total_count,
            percentage: percentage_of(f64::from(correct_count), total_count),
            passing_score,
            is_first_attempt,
            remaining,
        }
    }

    #[must_use]
    pub fn from_score(
        score: &ScoreResult,
        passing_score: u8,
        attempt_number: u32,
        remaining: RemainingAttempts,
    ) -> Self {
        Self {
            correct_count: score.correct_count(),
            total_count: score.total_count(),
            percentage: score.percentage(),
            passing_score,
            is_first_attempt: attempt_number <= 1,
            remaining,
        }
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.percentage >= self.passing_score
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub tone: FeedbackTone,
    pub headline: String,
    pub detail: String,
}

/// Passing wins; otherwise remaining attempts decide between encouraging and final.
#[must_use]
pub fn feedback_tone(ctx: &FeedbackContext) -> FeedbackTone {
    if ctx.passed() {
        FeedbackTone::Success
    } else if ctx.remaining.has_any() {
        FeedbackTone::Encouraging
    } else {
        FeedbackTone::Final
    }
}

#[must_use]
pub fn compose_feedback(ctx: &FeedbackContext) -> Feedback {
    let tone = feedback_tone(ctx);
    let tally = format!("{} of {} correct ({}%)", ctx.correct_count, ctx.total_count, ctx.percentage);

    let (headline, detail) = match (tone, ctx.is_first_attempt) {
        (FeedbackTone::Success, true) => (
            "Passed on the first try!".to_string(),
            format!("{tally}. Nicely done."),
        ),
        (FeedbackTone::Success, false) => (
            "Passed!".to_string(),
            format!("{tally}. Your persistence paid off."),
        ),
        (FeedbackTone::Encouraging, first) => {
            let lead = if first { "Not quite yet" } else { "Getting closer" };
            let attempts = match ctx.remaining {
                RemainingAttempts::Limited(1) => "You have 1 attempt left.".to_string(),
                RemainingAttempts::Limited(n) => format!("You have {n} attempts left."),
                RemainingAttempts::Unbounded => "You can try again whenever you are ready.".to_string(),
            };
            (
                format!("{lead}. You need {}% to pass.", ctx.passing_score),
                format!("{tally}. Review the suggested material, then retry. {attempts}"),
            )
        }
        (FeedbackTone::Final, _) => (
            "No attempts remaining".to_string(),
            format!("{tally}. Reach out to your mentor to talk through this topic."),
        ),
    };

    Feedback {
        tone,
        headline,
        detail,
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnswerKey, MaxAttempts, Question, QuizId, ResourceKind, SubmittedAnswer};

    fn quiz() -> QuizDefinition {
        QuizDefinition::new(
            QuizId::new(1),
            vec![
                Question::new("q1", AnswerKey::SingleChoice { correct_index: 0 })
                    .with_topic(TopicTag::new("fire")),
                Question::new("q2", AnswerKey::SingleChoice { correct_index: 0 }),
                Question::new("q3", AnswerKey::SingleChoice { correct_index: 0 })
                    .with_topic(TopicTag::new("fire")),
                Question::new("q4", AnswerKey::SingleChoice { correct_index: 0 }),
            ],
            70,
            MaxAttempts::Unbounded,
        )
    }

    fn all_wrong(quiz: &QuizDefinition) -> ScoreResult {
        let answers = quiz
            .questions
            .iter()
            .map(|q| (q.id.clone(), SubmittedAnswer::SingleChoice(9)))
            .collect();
        crate::evaluator::score_quiz(quiz, &answers)
    }

    fn catalog() -> RemediationCatalog {
        RemediationCatalog::new()
            .with_question("q2", RemediationSuggestion::video("vid-1", "Exits", 4, 95))
            .with_question("q4", RemediationSuggestion::video("vid-1", "Exits again", 4, 95))
            .with_topic(
                "fire",
                RemediationSuggestion::new("txt-fire", ResourceKind::TextSection, "Fire classes", 6),
            )
    }

    #[test]
    fn plan_dedupes_by_resource_preserving_first_occurrence() {
        let quiz = quiz();
        let planner = RemediationPlanner::new(catalog());

        let plan = planner.plan(&quiz, &all_wrong(&quiz));

        let ids: Vec<_> = plan.iter().map(|s| s.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["txt-fire", "vid-1"]);
        assert_eq!(plan[1].title, "Exits");
        assert_eq!(plan[1].start_time_secs, Some(95));
    }

    #[test]
    fn plan_respects_cap() {
        let quiz = quiz();
        let planner = RemediationPlanner::new(catalog()).with_max_suggestions(Some(1));
        assert_eq!(planner.plan(&quiz, &all_wrong(&quiz)).len(), 1);
    }

    #[test]
    fn plan_is_empty_without_mapped_misses() {
        let quiz = quiz();
        let planner = RemediationPlanner::new(RemediationCatalog::new());
        assert!(planner.plan(&quiz, &all_wrong(&quiz)).is_empty());
    }

    #[test]
    fn question_entry_wins_over_topic() {
        let catalog = RemediationCatalog::new()
            .with_question("q1", RemediationSuggestion::new("specific", ResourceKind::InteractiveChallenge, "Drill", 3))
            .with_topic("fire", RemediationSuggestion::new("general", ResourceKind::TextSection, "Overview", 5));
        let found = catalog.lookup(&QuestionId::new("q1"), Some(&TopicTag::new("fire"))).unwrap();
        assert_eq!(found.resource_id.as_str(), "specific");
    }

    #[test]
    fn feedback_tone_table() {
        use RemainingAttempts::{Limited, Unbounded};
        // (correct, total, first, remaining, expected)
        let cases = [
            (3, 3, true, Limited(2), FeedbackTone::Success),
            (3, 3, false, Limited(0), FeedbackTone::Success),
            (7, 10, false, Unbounded, FeedbackTone::Success),
            (2, 3, true, Limited(1), FeedbackTone::Encouraging),
            (0, 3, false, Unbounded, FeedbackTone::Encouraging),
            (2, 3, true, Limited(0), FeedbackTone::Final),
            (0, 3, false, Limited(0), FeedbackTone::Final),
            (0, 0, true, Limited(0), FeedbackTone::Final),
        ];

        for (correct, total, first, remaining, expected) in cases {
            let ctx = FeedbackContext::from_counts(correct, total, 70, first, remaining);
            assert_eq!(feedback_tone(&ctx), expected, "{correct}/{total} first={first} {remaining:?}");
        }
    }

    #[test]
    fn feedback_copy_mentions_remaining_attempts() {
        let ctx = FeedbackContext::from_counts(2, 3, 70, true, RemainingAttempts::Limited(1));
        let feedback = compose_feedback(&ctx);
        assert_eq!(feedback.tone, FeedbackTone::Encouraging);
        assert!(feedback.headline.contains("70%"));
        assert!(feedback.detail.starts_with("2 of 3 correct (67%)"));
        assert!(feedback.detail.ends_with("You have 1 attempt left."));
    }
}
