use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{QuestionId, QuizId, TopicTag};

//
// ─── ATTEMPT LIMITS ────────────────────────────────────────────────────────────
//

/// Upper bound on the number of attempts a learner may make at a quiz.
///
/// Serialized as an optional integer: `null` (or a missing field) means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Option<u32>", into = "Option<u32>")]
pub enum MaxAttempts {
    Limited(NonZeroU32),
    #[default]
    Unbounded,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("max attempts must be at least 1")]
pub struct InvalidMaxAttempts;

impl MaxAttempts {
    /// Limits attempts to `n`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMaxAttempts` when `n` is zero.
    pub fn limited(n: u32) -> Result<Self, InvalidMaxAttempts> {
        NonZeroU32::new(n).map(Self::Limited).ok_or(InvalidMaxAttempts)
    }

    /// Returns true if an attempt with the given 1-based number may be started.
    #[must_use]
    pub fn permits(self, attempt_number: u32) -> bool {
        match self {
            Self::Limited(max) => attempt_number <= max.get(),
            Self::Unbounded => true,
        }
    }

    /// Attempts still available after `prior_attempts` have been used.
    #[must_use]
    pub fn remaining_after(self, prior_attempts: u32) -> RemainingAttempts {
        match self {
            Self::Limited(max) => RemainingAttempts::Limited(max.get().saturating_sub(prior_attempts)),
            Self::Unbounded => RemainingAttempts::Unbounded,
        }
    }
}

impl TryFrom<Option<u32>> for MaxAttempts {
    type Error = InvalidMaxAttempts;

    fn try_from(value: Option<u32>) -> Result<Self, Self::Error> {
        match value {
            Some(n) => Self::limited(n),
            None => Ok(Self::Unbounded),
        }
    }
}

impl From<MaxAttempts> for Option<u32> {
    fn from(value: MaxAttempts) -> Self {
        match value {
            MaxAttempts::Limited(n) => Some(n.get()),
            MaxAttempts::Unbounded => None,
        }
    }
}

/// How many attempts a learner has left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainingAttempts {
    Limited(u32),
    Unbounded,
}

impl RemainingAttempts {
    #[must_use]
    pub fn has_any(self) -> bool {
        match self {
            Self::Limited(n) => n > 0,
            Self::Unbounded => true,
        }
    }
}

//
// ─── SCENARIOS ─────────────────────────────────────────────────────────────────
//

/// Branching decision tree for a scenario-path question.
///
/// Each complete path from the root ends in an outcome carrying the points that
/// path is worth; `perfect_score` is the value of the best path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub perfect_score: u32,
    pub root: ScenarioNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ScenarioNode {
    Decision {
        #[serde(default)]
        prompt: String,
        choices: Vec<ScenarioChoice>,
    },
    Outcome {
        score: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioChoice {
    #[serde(default)]
    pub label: String,
    pub next: ScenarioNode,
}

impl Scenario {
    /// Follows `path` (choice index per decision) from the root.
    ///
    /// Returns the outcome score, or `None` if the path leaves the tree or stops
    /// before reaching an outcome.
    #[must_use]
    pub fn path_score(&self, path: &[usize]) -> Option<u32> {
        let mut node = &self.root;
        for &choice in path {
            match node {
                ScenarioNode::Decision { choices, .. } => node = &choices.get(choice)?.next,
                ScenarioNode::Outcome { .. } => return None,
            }
        }
        match node {
            ScenarioNode::Outcome { score } => Some(*score),
            ScenarioNode::Decision { .. } => None,
        }
    }
}

//
// ─── QUESTIONS ─────────────────────────────────────────────────────────────────
//

/// The four supported question kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionKind {
    SingleChoice,
    MultiSelect,
    Ordering,
    ScenarioPath,
}

/// Kind-specific answer key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AnswerKey {
    #[serde(rename_all = "camelCase")]
    SingleChoice { correct_index: usize },
    #[serde(rename_all = "camelCase")]
    MultiSelect { correct_indices: Vec<usize> },
    /// `correct_order` lists original option indices in their correct sequence.
    #[serde(rename_all = "camelCase")]
    Ordering { correct_order: Vec<usize> },
    ScenarioPath { scenario: Scenario },
}

impl AnswerKey {
    #[must_use]
    pub fn kind(&self) -> QuestionKind {
        match self {
            Self::SingleChoice { .. } => QuestionKind::SingleChoice,
            Self::MultiSelect { .. } => QuestionKind::MultiSelect,
            Self::Ordering { .. } => QuestionKind::Ordering,
            Self::ScenarioPath { .. } => QuestionKind::ScenarioPath,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
    /// XP awarded for a fully correct answer.
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<TopicTag>,
    #[serde(flatten)]
    pub key: AnswerKey,
}

fn default_weight() -> u32 {
    10
}

impl Question {
    #[must_use]
    pub fn new(id: impl Into<String>, key: AnswerKey) -> Self {
        Self {
            id: QuestionId::new(id),
            prompt: String::new(),
            options: Vec::new(),
            weight: default_weight(),
            topic: None,
            key,
        }
    }

    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn with_topic(mut self, topic: TopicTag) -> Self {
        self.topic = Some(topic);
        self
    }

    #[must_use]
    pub fn kind(&self) -> QuestionKind {
        self.key.kind()
    }
}

//
// ─── QUIZ DEFINITION ───────────────────────────────────────────────────────────
//

/// Immutable, already-validated quiz supplied by course data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizDefinition {
    pub id: QuizId,
    #[serde(default)]
    pub title: String,
    pub questions: Vec<Question>,
    /// Percentage (0-100) required to pass.
    pub passing_score: u8,
    #[serde(default)]
    pub max_attempts: MaxAttempts,
}

impl QuizDefinition {
    #[must_use]
    pub fn new(
        id: QuizId,
        questions: Vec<Question>,
        passing_score: u8,
        max_attempts: MaxAttempts,
    ) -> Self {
        Self {
            id,
            title: String::new(),
            questions,
            passing_score,
            max_attempts,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    #[must_use]
    pub fn question_at(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    #[must_use]
    pub fn position_of(&self, id: &QuestionId) -> Option<usize> {
        self.questions.iter().position(|q| &q.id == id)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn two_step_scenario() -> Scenario {
        Scenario {
            perfect_score: 10,
            root: ScenarioNode::Decision {
                prompt: "Customer is upset".into(),
                choices: vec![
                    ScenarioChoice {
                        label: "Listen".into(),
                        next: ScenarioNode::Decision {
                            prompt: "They calm down".into(),
                            choices: vec![
                                ScenarioChoice {
                                    label: "Offer refund".into(),
                                    next: ScenarioNode::Outcome { score: 10 },
                                },
                                ScenarioChoice {
                                    label: "Escalate".into(),
                                    next: ScenarioNode::Outcome { score: 6 },
                                },
                            ],
                        },
                    },
                    ScenarioChoice {
                        label: "Argue".into(),
                        next: ScenarioNode::Outcome { score: 0 },
                    },
                ],
            },
        }
    }

    #[test]
    fn scenario_path_score_follows_choices() {
        let scenario = two_step_scenario();
        assert_eq!(scenario.path_score(&[0, 0]), Some(10));
        assert_eq!(scenario.path_score(&[0, 1]), Some(6));
        assert_eq!(scenario.path_score(&[1]), Some(0));
    }

    #[test]
    fn scenario_path_score_rejects_incomplete_or_invalid_paths() {
        let scenario = two_step_scenario();
        assert_eq!(scenario.path_score(&[0]), None);
        assert_eq!(scenario.path_score(&[]), None);
        assert_eq!(scenario.path_score(&[5]), None);
        assert_eq!(scenario.path_score(&[1, 0]), None);
    }

    #[test]
    fn max_attempts_permits_and_remaining() {
        let max = MaxAttempts::limited(2).unwrap();
        assert!(max.permits(1));
        assert!(max.permits(2));
        assert!(!max.permits(3));
        assert_eq!(max.remaining_after(1), RemainingAttempts::Limited(1));
        assert_eq!(max.remaining_after(5), RemainingAttempts::Limited(0));
        assert!(!max.remaining_after(2).has_any());
        assert!(MaxAttempts::Unbounded.remaining_after(1000).has_any());
        assert!(MaxAttempts::limited(0).is_err());
    }

    #[test]
    fn quiz_definition_deserializes_from_authoring_json() {
        let json = r#"{
            "id": 7,
            "title": "Safety basics",
            "passingScore": 70,
            "maxAttempts": 3,
            "questions": [
                {"id": "q1", "kind": "single-choice", "correctIndex": 1, "weight": 5},
                {"id": "q2", "kind": "multi-select", "correctIndices": [0, 2], "topic": "ppe"},
                {"id": "q3", "kind": "ordering", "correctOrder": [2, 0, 1]},
                {"id": "q4", "kind": "scenario-path", "scenario": {
                    "perfectScore": 4,
                    "root": {"type": "decision", "choices": [
                        {"label": "a", "next": {"type": "outcome", "score": 4}}
                    ]}
                }}
            ]
        }"#;

        let quiz: QuizDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(quiz.id, QuizId::new(7));
        assert_eq!(quiz.max_attempts, MaxAttempts::limited(3).unwrap());
        assert_eq!(quiz.questions[0].weight, 5);
        assert_eq!(quiz.questions[1].weight, 10);
        assert_eq!(quiz.questions[1].topic, Some(TopicTag::new("ppe")));
        assert_eq!(quiz.questions[2].kind(), QuestionKind::Ordering);
        assert_eq!(quiz.questions[3].kind(), QuestionKind::ScenarioPath);
        assert_eq!(quiz.position_of(&QuestionId::new("q3")), Some(2));
    }

    #[test]
    fn missing_max_attempts_is_unbounded() {
        let json = r#"{"id": 1, "passingScore": 50, "questions": []}"#;
        let quiz: QuizDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(quiz.max_attempts, MaxAttempts::Unbounded);
        assert!(quiz.is_empty());
    }
}
