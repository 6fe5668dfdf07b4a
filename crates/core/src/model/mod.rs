mod answer;
mod attempt;
mod ids;
mod progress;
mod quiz;
mod remediation;
mod score;

pub use ids::{LearnerId, ParseIdError, QuestionId, QuizId, ResourceId, TopicTag};

pub use answer::SubmittedAnswer;
pub use attempt::{Advance, AttemptError, AttemptState, AttemptStatus};
pub use progress::{
    AttemptSnapshot, LessonProgress, PersistedProgressRecord, ProgressPatch, VideoProgress,
};
pub use quiz::{
    AnswerKey, InvalidMaxAttempts, MaxAttempts, Question, QuestionKind, QuizDefinition,
    RemainingAttempts, Scenario, ScenarioChoice, ScenarioNode,
};
pub use remediation::{RemediationSuggestion, ResourceKind};
pub use score::ScoreResult;
