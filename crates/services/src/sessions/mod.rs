mod controller;
mod progress;
mod session;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use controller::{QuizSessionService, StepOutcome, SubmissionOutcome};
pub use progress::SessionProgress;
pub use session::QuizSession;
