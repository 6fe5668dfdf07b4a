//! Pure scoring of submitted answers.
//!
//! Nothing here fails: an unanswered question, or an answer whose shape does
//! not match its question kind, scores zero.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{AnswerKey, Question, QuestionId, QuizDefinition, ScoreResult, SubmittedAnswer};

//
// ─── PER-QUESTION ──────────────────────────────────────────────────────────────
//

/// Credit earned on a single question, in `0.0..=1.0`.
///
/// Binary kinds earn either 0 or 1. Scenario paths earn the reached outcome's
/// score divided by the scenario's perfect score.
#[must_use]
pub fn credit(question: &Question, answer: Option<&SubmittedAnswer>) -> f64 {
    let Some(answer) = answer else {
        return 0.0;
    };

    match (&question.key, answer) {
        (AnswerKey::SingleChoice { correct_index }, SubmittedAnswer::SingleChoice(chosen)) => {
            binary(chosen == correct_index)
        }
        (AnswerKey::MultiSelect { correct_indices }, SubmittedAnswer::MultiSelect(chosen)) => {
            binary(same_set(chosen, correct_indices))
        }
        (AnswerKey::Ordering { correct_order }, SubmittedAnswer::Ordering(arranged)) => {
            binary(arranged == correct_order)
        }
        (AnswerKey::ScenarioPath { scenario }, SubmittedAnswer::ScenarioPath(path)) => {
            if scenario.perfect_score == 0 {
                return 0.0;
            }
            scenario.path_score(path).map_or(0.0, |score| {
                (f64::from(score) / f64::from(scenario.perfect_score)).clamp(0.0, 1.0)
            })
        }
        _ => 0.0,
    }
}

/// Whether the answer is fully correct.
///
/// For scenario paths this means the reached outcome is worth the perfect score.
#[must_use]
pub fn is_correct(question: &Question, answer: Option<&SubmittedAnswer>) -> bool {
    credit(question, answer) >= 1.0
}

fn binary(correct: bool) -> f64 {
    if correct { 1.0 } else { 0.0 }
}

// Exact set equality: extra or missing indices both fail.
fn same_set(chosen: &[usize], correct: &[usize]) -> bool {
    let chosen: BTreeSet<_> = chosen.iter().collect();
    let correct: BTreeSet<_> = correct.iter().collect();
    chosen == correct
}

//
// ─── WHOLE QUIZ ────────────────────────────────────────────────────────────────
//

/// Scores every question of `quiz` against the captured answers.
///
/// `percentage` accumulates fractional scenario credit, so a quiz with a
/// half-credit scenario and one correct single-choice question scores 75.
#[must_use]
pub fn score_quiz(
    quiz: &QuizDefinition,
    answers: &BTreeMap<QuestionId, SubmittedAnswer>,
) -> ScoreResult {
    let mut per_question = Vec::with_capacity(quiz.questions.len());
    let mut earned = 0.0_f64;
    let mut xp = 0.0_f64;

    for question in &quiz.questions {
        let credit = credit(question, answers.get(&question.id));
        earned += credit;
        xp += f64::from(question.weight) * credit;
        per_question.push(credit >= 1.0);
    }

    let total = u32::try_from(per_question.len()).unwrap_or(u32::MAX);
    let correct = u32::try_from(per_question.iter().filter(|ok| **ok).count()).unwrap_or(u32::MAX);
    let percentage = percentage_of(earned, total);
    let passed = percentage >= quiz.passing_score;

    ScoreResult::new(correct, total, percentage, passed, per_question, round_to_u32(xp))
}

/// `round(earned / total * 100)`, clamped to `0..=100`. An empty quiz scores 0.
#[must_use]
pub fn percentage_of(earned: f64, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (earned / f64::from(total) * 100.0).round().clamp(0.0, 100.0);
    // Clamped above, so the cast cannot truncate.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let pct = pct as u8;
    pct
}

fn round_to_u32(value: f64) -> u32 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rounded = value.round().clamp(0.0, f64::from(u32::MAX)) as u32;
    rounded
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MaxAttempts, QuizId, Scenario, ScenarioChoice, ScenarioNode};

    fn single(id: &str, correct_index: usize) -> Question {
        Question::new(id, AnswerKey::SingleChoice { correct_index })
    }

    fn scenario_question(id: &str) -> Question {
        let outcome = |score| ScenarioChoice {
            label: String::new(),
            next: ScenarioNode::Outcome { score },
        };
        Question::new(
            id,
            AnswerKey::ScenarioPath {
                scenario: Scenario {
                    perfect_score: 8,
                    root: ScenarioNode::Decision {
                        prompt: String::new(),
                        choices: vec![outcome(8), outcome(4), outcome(0)],
                    },
                },
            },
        )
    }

    #[test]
    fn single_choice_matches_index() {
        let q = single("q1", 2);
        assert!(is_correct(&q, Some(&SubmittedAnswer::SingleChoice(2))));
        assert!(!is_correct(&q, Some(&SubmittedAnswer::SingleChoice(1))));
    }

    #[test]
    fn multi_select_requires_exact_set() {
        let q = Question::new("q", AnswerKey::MultiSelect { correct_indices: vec![0, 2] });
        let check = |v: Vec<usize>| is_correct(&q, Some(&SubmittedAnswer::MultiSelect(v)));

        assert!(check(vec![0, 2]));
        assert!(check(vec![2, 0]));
        assert!(!check(vec![0, 1, 2]));
        assert!(!check(vec![0]));
        assert!(!check(vec![0, 0]));
        assert!(!check(vec![]));
    }

    #[test]
    fn ordering_compares_full_sequence_positionally() {
        let q = Question::new("q", AnswerKey::Ordering { correct_order: vec![2, 0, 1] });
        assert!(is_correct(&q, Some(&SubmittedAnswer::Ordering(vec![2, 0, 1]))));
        assert!(!is_correct(&q, Some(&SubmittedAnswer::Ordering(vec![0, 2, 1]))));
        assert!(!is_correct(&q, Some(&SubmittedAnswer::Ordering(vec![2, 0]))));
    }

    #[test]
    fn scenario_path_earns_fractional_credit() {
        let q = scenario_question("s");
        assert_eq!(credit(&q, Some(&SubmittedAnswer::ScenarioPath(vec![0]))), 1.0);
        assert_eq!(credit(&q, Some(&SubmittedAnswer::ScenarioPath(vec![1]))), 0.5);
        assert_eq!(credit(&q, Some(&SubmittedAnswer::ScenarioPath(vec![9]))), 0.0);
        assert!(is_correct(&q, Some(&SubmittedAnswer::ScenarioPath(vec![0]))));
        assert!(!is_correct(&q, Some(&SubmittedAnswer::ScenarioPath(vec![1]))));
    }

    #[test]
    fn missing_and_malformed_answers_score_zero() {
        let q = single("q1", 0);
        assert_eq!(credit(&q, None), 0.0);
        assert_eq!(credit(&q, Some(&SubmittedAnswer::MultiSelect(vec![0]))), 0.0);
        assert_eq!(credit(&q, Some(&SubmittedAnswer::Ordering(vec![0]))), 0.0);
    }

    #[test]
    fn score_quiz_rounds_percentage_and_applies_threshold() {
        let quiz = QuizDefinition::new(
            QuizId::new(1),
            vec![single("q1", 0), single("q2", 1), single("q3", 2)],
            70,
            MaxAttempts::Unbounded,
        );
        let answers = BTreeMap::from([
            (QuestionId::new("q1"), SubmittedAnswer::SingleChoice(0)),
            (QuestionId::new("q2"), SubmittedAnswer::SingleChoice(1)),
            (QuestionId::new("q3"), SubmittedAnswer::SingleChoice(0)),
        ]);

        let result = score_quiz(&quiz, &answers);

        assert_eq!(result.correct_count(), 2);
        assert_eq!(result.total_count(), 3);
        assert_eq!(result.percentage(), 67);
        assert!(!result.passed());
        assert_eq!(result.per_question_correctness(), &[true, true, false]);
        assert_eq!(result.missed_indices().collect::<Vec<_>>(), vec![2]);
        assert_eq!(result.xp_earned(), 20);
    }

    #[test]
    fn score_quiz_accumulates_scenario_credit() {
        let quiz = QuizDefinition::new(
            QuizId::new(1),
            vec![single("q1", 0), scenario_question("s1")],
            75,
            MaxAttempts::Unbounded,
        );
        let answers = BTreeMap::from([
            (QuestionId::new("q1"), SubmittedAnswer::SingleChoice(0)),
            (QuestionId::new("s1"), SubmittedAnswer::ScenarioPath(vec![1])),
        ]);

        let result = score_quiz(&quiz, &answers);

        assert_eq!(result.percentage(), 75);
        assert!(result.passed());
        assert_eq!(result.correct_count(), 1);
        assert_eq!(result.per_question_correctness(), &[true, false]);
        assert_eq!(result.xp_earned(), 15);
    }

    #[test]
    fn percentage_stays_in_range_and_passed_matches_threshold() {
        for passing in [0_u8, 1, 50, 67, 99, 100] {
            for total in 0_u32..6 {
                for correct in 0..=total {
                    let pct = percentage_of(f64::from(correct), total);
                    assert!(pct <= 100);
                    let questions = (0..total).map(|i| single(&format!("q{i}"), 0)).collect();
                    let quiz = QuizDefinition::new(
                        QuizId::new(1),
                        questions,
                        passing,
                        MaxAttempts::Unbounded,
                    );
                    let answers = (0..correct)
                        .map(|i| (QuestionId::new(format!("q{i}")), SubmittedAnswer::SingleChoice(0)))
                        .collect();
                    let result = score_quiz(&quiz, &answers);
                    assert_eq!(result.percentage(), pct);
                    assert_eq!(result.passed(), result.percentage() >= passing);
                }
            }
        }
    }
}
