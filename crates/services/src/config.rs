//! Engine configuration, read once at startup.

use std::time::Duration;

use tracing::warn;

use crate::persistence::SavePolicy;

pub const DEFAULT_DEBOUNCE_INTERVAL: Duration = Duration::from_secs(30);

/// Tunables for the persistence port and the session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub save_policy: SavePolicy,
    pub debounce_interval: Duration,
    /// Cap on remediation suggestions per failed attempt. `None` means unlimited.
    pub max_remediation_suggestions: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            save_policy: SavePolicy::Debounced,
            debounce_interval: DEFAULT_DEBOUNCE_INTERVAL,
            max_remediation_suggestions: None,
        }
    }
}

impl EngineConfig {
    /// Read `QUIZ_SAVE_MODE`, `QUIZ_DEBOUNCE_SECS` and `QUIZ_MAX_SUGGESTIONS`.
    ///
    /// Unset variables keep their defaults; invalid ones are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup("QUIZ_SAVE_MODE") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "immediate" => config.save_policy = SavePolicy::Immediate,
                "debounced" => config.save_policy = SavePolicy::Debounced,
                other => warn!(value = other, "ignoring unknown QUIZ_SAVE_MODE"),
            }
        }

        if let Some(raw) = lookup("QUIZ_DEBOUNCE_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.debounce_interval = Duration::from_secs(secs),
                _ => warn!(value = %raw, "ignoring invalid QUIZ_DEBOUNCE_SECS"),
            }
        }

        if let Some(raw) = lookup("QUIZ_MAX_SUGGESTIONS") {
            match raw.trim().parse::<usize>() {
                Ok(max) => config.max_remediation_suggestions = Some(max),
                Err(_) => warn!(value = %raw, "ignoring invalid QUIZ_MAX_SUGGESTIONS"),
            }
        }

        config
    }

    #[must_use]
    pub fn with_save_policy(mut self, policy: SavePolicy) -> Self {
        self.save_policy = policy;
        self
    }

    #[must_use]
    pub fn with_debounce_interval(mut self, interval: Duration) -> Self {
        self.debounce_interval = interval;
        self
    }
}
