//! Checkpoint ledger over the project's version control.
//!
//! The ledger is the only component allowed to touch history. Every
//! checkpoint is a commit plus an entry in the session's append-only log;
//! rolling back moves the working tree but never removes log entries.
//! When the project is not a git repository the ledger is "unavailable":
//! checkpoints return `None` and rollbacks fail cleanly.

pub mod git;

pub use git::GitTracker;

use crate::errors::{RemedyError, Result};
use crate::session::{Checkpoint, SessionDocument};
use chrono::Utc;
use std::path::Path;

/// Prefix on every commit message the ledger creates.
pub const COMMIT_PREFIX: &str = "[remedy]";

/// Minimal version-control surface the ledger needs.
pub trait VersionControl {
    /// Stage all working-tree changes and commit, allowing empty commits.
    fn commit_all(&self, message: &str) -> anyhow::Result<String>;
    /// Discard working-tree changes and reset to `sha`.
    fn reset_hard(&self, sha: &str) -> anyhow::Result<()>;
}

pub struct CheckpointLedger {
    vcs: Option<Box<dyn VersionControl>>,
}

impl CheckpointLedger {
    /// Open the ledger for `project_dir`, degrading to unavailable when the
    /// directory is not a git repository.
    pub fn open(project_dir: &Path) -> Self {
        match GitTracker::new(project_dir) {
            Ok(tracker) => Self::with_vcs(Box::new(tracker)),
            Err(e) => {
                tracing::info!(
                    project = %project_dir.display(),
                    error = %e,
                    "version control unavailable; continuing without rollback"
                );
                Self::unavailable()
            }
        }
    }

    pub fn with_vcs(vcs: Box<dyn VersionControl>) -> Self {
        Self { vcs: Some(vcs) }
    }

    pub fn unavailable() -> Self {
        Self { vcs: None }
    }

    pub fn is_available(&self) -> bool {
        self.vcs.is_some()
    }

    /// Commit the working tree and log the checkpoint on `doc`.
    ///
    /// Returns `Ok(None)` when version control is unavailable.
    pub fn checkpoint(&self, doc: &mut SessionDocument, message: &str) -> Result<Option<String>> {
        let Some(vcs) = &self.vcs else {
            tracing::debug!(message, "checkpoint skipped; version control unavailable");
            return Ok(None);
        };

        let sha = vcs
            .commit_all(&format!("{} {}", COMMIT_PREFIX, message))
            .map_err(|e| RemedyError::Checkpoint(format!("{message}: {e:#}")))?;

        doc.checkpoints.push(Checkpoint {
            sha: sha.clone(),
            msg: message.to_string(),
            ts: Utc::now(),
        });
        tracing::info!(sha = %short_sha(&sha), message, "checkpoint created");
        Ok(Some(sha))
    }

    /// Reset the working tree to `sha`. A failure is always reported.
    pub fn rollback(&self, sha: &str) -> Result<()> {
        let Some(vcs) = &self.vcs else {
            return Err(RemedyError::RollbackFailed {
                sha: sha.to_string(),
                message: "version control unavailable".to_string(),
            });
        };

        vcs.reset_hard(sha).map_err(|e| RemedyError::RollbackFailed {
            sha: sha.to_string(),
            message: format!("{e:#}"),
        })?;
        tracing::info!(sha = %short_sha(sha), "rolled back");
        Ok(())
    }
}

pub fn short_sha(sha: &str) -> &str {
    &sha[..sha.len().min(8)]
}
