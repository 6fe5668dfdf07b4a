use serde::{Deserialize, Serialize};

use crate::model::quiz::QuestionKind;

/// A learner's answer to one question, tagged by the question kind it was
/// captured for.
///
/// The tag is resolved once at capture time. A value whose tag does not match
/// the question it is scored against is treated as incorrect, never rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum SubmittedAnswer {
    SingleChoice(usize),
    MultiSelect(Vec<usize>),
    /// Original option indices in the order the learner arranged them.
    Ordering(Vec<usize>),
    /// Choice index taken at each decision of the scenario tree.
    ScenarioPath(Vec<usize>),
}

impl SubmittedAnswer {
    #[must_use]
    pub fn kind(&self) -> QuestionKind {
        match self {
            Self::SingleChoice(_) => QuestionKind::SingleChoice,
            Self::MultiSelect(_) => QuestionKind::MultiSelect,
            Self::Ordering(_) => QuestionKind::Ordering,
            Self::ScenarioPath(_) => QuestionKind::ScenarioPath,
        }
    }

    /// Resolves an ordering answer given in display positions.
    ///
    /// `display_order[p]` is the original index of the option shown at display
    /// position `p`; `arranged` is the learner's final sequence of display
    /// positions. Returns `None` if any position is out of range, in which case
    /// the caller should capture the raw value and let scoring mark it wrong.
    #[must_use]
    pub fn ordering_from_display(display_order: &[usize], arranged: &[usize]) -> Option<Self> {
        arranged
            .iter()
            .map(|&pos| display_order.get(pos).copied())
            .collect::<Option<Vec<_>>>()
            .map(Self::Ordering)
    }
}
