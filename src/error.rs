// ⚠️ Error Taxonomy - Balance Reset Engine
//
// NotFound / InvalidInput / Storage are the failures callers see.
// Scheduler start/stop no-ops are NOT errors (see scheduler::StartOutcome).

use thiserror::Error;

/// Errors surfaced by the store, the executor and the admin surface
#[derive(Debug, Error)]
pub enum ResetError {
    /// Single-account operation on an unknown or soft-deleted id
    #[error("account not found: {0}")]
    NotFound(String),

    /// Account exists but has no default balance to reset to
    #[error("account {0} has no default balance configured")]
    DefaultNotConfigured(String),

    /// Caller supplied a value we cannot use (non-numeric amount, unknown action)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Underlying store call failed
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Stored value could not be decoded (bad decimal / timestamp text)
    #[error("corrupt stored value: {0}")]
    Corrupt(String),

    /// Blocking storage job panicked or was cancelled
    #[error("background task failed: {0}")]
    Task(String),
}

impl ResetError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ResetError::InvalidInput(msg.into())
    }

    /// NotFound is a normal, reportable outcome rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, ResetError::NotFound(_))
    }
}

impl From<tokio::task::JoinError> for ResetError {
    fn from(err: tokio::task::JoinError) -> Self {
        ResetError::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ResetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ResetError::NotFound("acc-1".to_string());
        assert_eq!(err.to_string(), "account not found: acc-1");
        assert!(err.is_not_found());

        let err = ResetError::invalid("Value must be a number");
        assert_eq!(err.to_string(), "invalid input: Value must be a number");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: ResetError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, ResetError::Storage(_)));
    }
}
