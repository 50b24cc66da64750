//! Typed error hierarchy for the phasekeep orchestrator.
//!
//! Store failures are translated into [`CoordinatorError`], and every
//! coordinator error belongs to exactly one [`ErrorCategory`] that tells the
//! caller how to react:
//! - `Retryable`: try again on the next scheduling cycle
//! - `Fatal`: the engine has halted; abort the process
//! - `Skip`: log it and move on to other work
//! - `Unexpected`: a store failure without a dedicated policy

use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Handling policy for a coordinator error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Retryable,
    Fatal,
    Skip,
    Unexpected,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Retryable => write!(f, "retryable"),
            ErrorCategory::Fatal => write!(f, "fatal"),
            ErrorCategory::Skip => write!(f, "skip"),
            ErrorCategory::Unexpected => write!(f, "unexpected"),
        }
    }
}

/// Errors carried in coordinator replies.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Store lock not acquired (waited {waited_ms}ms on the last attempt)")]
    LockTimeout { waited_ms: u64 },

    #[error("Storage corrupted at {path}: {message}")]
    StorageCorrupt { path: PathBuf, message: String },

    #[error("Store not initialized at {path}")]
    NotInitialized { path: PathBuf },

    #[error("ID allocation exhausted for prefix '{prefix}' after {attempts} attempts")]
    IdExhausted { prefix: String, attempts: u32 },

    #[error("Store operation panicked: {message}")]
    StorePanic { message: String },

    #[error("Item {id} not found")]
    ItemNotFound { id: String },

    #[error("Invalid transition for {id}: {message}")]
    InvalidTransition { id: String, message: String },

    #[error("Merging into {id} would create a dependency cycle: {}", .cycle.join(" -> "))]
    DependencyCycle { id: String, cycle: Vec<String> },

    #[error("Unexpected store failure: {message}")]
    Unexpected { message: String },

    #[error("Coordinator has halted and no longer accepts commands")]
    Halted,
}

impl CoordinatorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoordinatorError::LockTimeout { .. } => ErrorCategory::Retryable,
            CoordinatorError::StorageCorrupt { .. }
            | CoordinatorError::NotInitialized { .. }
            | CoordinatorError::IdExhausted { .. }
            | CoordinatorError::StorePanic { .. }
            | CoordinatorError::Halted => ErrorCategory::Fatal,
            CoordinatorError::ItemNotFound { .. }
            | CoordinatorError::InvalidTransition { .. }
            | CoordinatorError::DependencyCycle { .. } => ErrorCategory::Skip,
            CoordinatorError::Unexpected { .. } => ErrorCategory::Unexpected,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Fatal
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Retryable
    }

    pub fn invalid_transition(id: &str, message: impl Into<String>) -> Self {
        CoordinatorError::InvalidTransition {
            id: id.to_string(),
            message: message.into(),
        }
    }
}

impl From<StoreError> for CoordinatorError {
    // No wildcard arm: a new StoreError variant must be given a policy here.
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockTimeout { waited_ms } => CoordinatorError::LockTimeout { waited_ms },
            StoreError::NotInitialized { path } => CoordinatorError::NotInitialized { path },
            StoreError::Corrupt { path, message } => {
                CoordinatorError::StorageCorrupt { path, message }
            }
            StoreError::ItemNotFound { id } => CoordinatorError::ItemNotFound { id },
            StoreError::IdExhausted { prefix, attempts } => {
                CoordinatorError::IdExhausted { prefix, attempts }
            }
            e @ StoreError::InvalidId { .. } => CoordinatorError::Unexpected {
                message: e.to_string(),
            },
            e @ StoreError::Io { .. } => CoordinatorError::Unexpected {
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_is_retryable() {
        let err: CoordinatorError = StoreError::LockTimeout { waited_ms: 5000 }.into();
        assert_eq!(err.category(), ErrorCategory::Retryable);
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn storage_failures_are_fatal() {
        let corrupt: CoordinatorError = StoreError::Corrupt {
            path: PathBuf::from("/x/items.json"),
            message: "bad json".into(),
        }
        .into();
        let missing: CoordinatorError = StoreError::NotInitialized {
            path: PathBuf::from("/x"),
        }
        .into();
        let exhausted: CoordinatorError = StoreError::IdExhausted {
            prefix: "WRK".into(),
            attempts: 1000,
        }
        .into();
        for err in [corrupt, missing, exhausted] {
            assert!(err.is_fatal(), "{err} should be fatal");
        }
        assert!(
            CoordinatorError::StorePanic {
                message: "boom".into()
            }
            .is_fatal()
        );
        assert!(CoordinatorError::Halted.is_fatal());
    }

    #[test]
    fn not_found_and_invalid_transition_are_skipped() {
        let not_found: CoordinatorError = StoreError::ItemNotFound { id: "WRK-3".into() }.into();
        assert_eq!(not_found.category(), ErrorCategory::Skip);
        assert!(not_found.to_string().contains("WRK-3"));

        let invalid = CoordinatorError::invalid_transition("WRK-1", "not blocked");
        assert_eq!(invalid.category(), ErrorCategory::Skip);

        let cycle = CoordinatorError::DependencyCycle {
            id: "WRK-1".into(),
            cycle: vec!["WRK-1".into(), "WRK-2".into(), "WRK-1".into()],
        };
        assert_eq!(cycle.category(), ErrorCategory::Skip);
        assert!(cycle.to_string().contains("WRK-1 -> WRK-2 -> WRK-1"));
    }

    #[test]
    fn io_and_invalid_id_are_unexpected() {
        let io: CoordinatorError = StoreError::Io {
            path: PathBuf::from("/x/items.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        }
        .into();
        assert_eq!(io.category(), ErrorCategory::Unexpected);
        assert!(io.to_string().contains("denied"));

        let invalid: CoordinatorError = StoreError::InvalidId { id: "w r k".into() }.into();
        assert_eq!(invalid.category(), ErrorCategory::Unexpected);
    }

    #[test]
    fn coordinator_error_implements_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&CoordinatorError::Halted);
        assert_std_error(&StoreError::LockTimeout { waited_ms: 1 });
    }
}
