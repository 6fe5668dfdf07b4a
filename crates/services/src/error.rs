//! Shared error types for the services crate.

use thiserror::Error;

use quiz_core::model::AttemptError;
use storage::repository::StorageError;

/// Errors emitted by `ProgressPersistence`.
///
/// These never block quiz navigation: the session controller logs them and the
/// save-status channel reports them; the in-memory attempt stays authoritative.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PersistenceError {
    /// Another writer (usually a second tab) saved a newer version.
    #[error("progress was saved elsewhere; reload before saving again")]
    StaleVersion,
    #[error("no progress record is active; load or begin an attempt first")]
    NoActiveRecord,
    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for PersistenceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict => Self::StaleVersion,
            other => Self::Storage(other),
        }
    }
}

/// Errors emitted by the quiz session controller.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("the current attempt has not been submitted yet")]
    AttemptInProgress,
    #[error(transparent)]
    Attempt(#[from] AttemptError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_conflict_maps_to_stale_version() {
        assert!(matches!(
            PersistenceError::from(StorageError::Conflict),
            PersistenceError::StaleVersion
        ));
        assert!(matches!(
            PersistenceError::from(StorageError::NotFound),
            PersistenceError::Storage(StorageError::NotFound)
        ));
    }
}
