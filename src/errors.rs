//! Typed error hierarchy for the remediation core.
//!
//! One enum covers the whole taxonomy:
//! - input errors (`BugNotFound`, `InvalidStatus`, `NoSession`, `SessionExists`)
//!   are rejected before any state change
//! - checkpoint failures (`NoCheckpoint`, `RollbackFailed`, `Checkpoint`) are fatal
//!   to the current bug's retry loop, never to the whole run
//! - collaborator failures (`Collaborator`) are recorded against the bug
//! - persistence and configuration failures (`Store`, `Yaml`, `Config`)

use crate::session::BugStatus;
use thiserror::Error;

/// Errors from the session store, lifecycle engine and pipeline driver.
#[derive(Debug, Error)]
pub enum RemedyError {
    #[error("Bug {id} not found in session")]
    BugNotFound { id: String },

    #[error("Bug {id} is {status}; {operation} requires {expected}")]
    InvalidStatus {
        id: String,
        status: BugStatus,
        operation: &'static str,
        expected: &'static str,
    },

    #[error("No active session under {path}. Run 'remedy init' first")]
    NoSession { path: std::path::PathBuf },

    #[error("A session already exists under {path}. Use 'remedy resume' or 'remedy init --force'")]
    SessionExists { path: std::path::PathBuf },

    #[error("Bug {id} has no checkpoint to roll back to")]
    NoCheckpoint { id: String },

    #[error("Rollback to {sha} failed: {message}")]
    RollbackFailed { sha: String, message: String },

    #[error("Checkpoint failed: {0}")]
    Checkpoint(String),

    /// A scanner, fixer, verifier or test generator call failed.
    #[error("{operation} failed for {subject}: {message}")]
    Collaborator {
        operation: &'static str,
        subject: String,
        message: String,
    },

    #[error("Failed to {action} {path}: {source}")]
    Store {
        action: &'static str,
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in {path}: {source}")]
    Yaml {
        path: std::path::PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RemedyError {
    /// Input errors are the caller's fault and leave the session untouched.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::BugNotFound { .. }
                | Self::InvalidStatus { .. }
                | Self::NoSession { .. }
                | Self::SessionExists { .. }
                | Self::NoCheckpoint { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RemedyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_status_names_operation_and_status() {
        let err = RemedyError::InvalidStatus {
            id: "B1A2B3C".to_string(),
            status: BugStatus::Verified,
            operation: "fix",
            expected: "pending, fixing or needs_review",
        };
        let msg = err.to_string();
        assert!(msg.contains("B1A2B3C"));
        assert!(msg.contains("verified"));
        assert!(msg.contains("fix"));
        assert!(err.is_input_error());
    }

    #[test]
    fn rollback_failed_is_not_an_input_error() {
        let err = RemedyError::RollbackFailed {
            sha: "abc123".to_string(),
            message: "object not found".to_string(),
        };
        assert!(!err.is_input_error());
        assert!(err.to_string().contains("abc123"));
    }

    #[test]
    fn store_error_carries_path_and_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = RemedyError::Store {
            action: "write",
            path: std::path::PathBuf::from("/p/.remedy/state.yaml"),
            source: io_err,
        };
        match &err {
            RemedyError::Store { path, source, .. } => {
                assert!(path.ends_with("state.yaml"));
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected Store"),
        }
    }

    #[test]
    fn all_variants_implement_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&RemedyError::Checkpoint("x".into()));
        assert_std_error(&RemedyError::Config("y".into()));
    }
}
