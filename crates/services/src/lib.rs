#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod events;
pub mod interrupt;
pub mod persistence;
pub mod sessions;

pub use quiz_core::Clock;
pub use sessions as session;

pub use config::EngineConfig;
pub use error::{PersistenceError, SessionError};
pub use events::{CompletionEvent, EventBus, EventSeq, MemoryEventBus};
pub use interrupt::{InterruptHandler, InterruptHub, InterruptSignal};
pub use persistence::{
    FlushTrigger, ProgressPersistence, SaveOptions, SaveOutcome, SavePolicy, SaveStatus,
};
pub use sessions::{QuizSession, QuizSessionService, SessionProgress, StepOutcome, SubmissionOutcome};
