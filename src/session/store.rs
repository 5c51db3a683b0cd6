use super::SessionDocument;
use crate::errors::{RemedyError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Sole owner of the on-disk session document.
///
/// Saves are atomic: the document is written to a sibling temp file and then
/// renamed over `state.yaml`, so a crash mid-write never leaves a truncated
/// session behind.
pub struct SessionStore {
    state_file: PathBuf,
}

impl SessionStore {
    pub fn new(state_file: PathBuf) -> Self {
        Self { state_file }
    }

    pub fn path(&self) -> &Path {
        &self.state_file
    }

    pub fn exists(&self) -> bool {
        self.state_file.exists()
    }

    pub fn load(&self) -> Result<SessionDocument> {
        if !self.exists() {
            return Err(RemedyError::NoSession {
                path: self.state_file.clone(),
            });
        }
        let content = fs::read_to_string(&self.state_file).map_err(|source| RemedyError::Store {
            action: "read",
            path: self.state_file.clone(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| RemedyError::Yaml {
            path: self.state_file.clone(),
            source,
        })
    }

    pub fn save(&self, doc: &SessionDocument) -> Result<()> {
        let yaml = serde_yaml::to_string(doc).map_err(|source| RemedyError::Yaml {
            path: self.state_file.clone(),
            source,
        })?;

        if let Some(parent) = self.state_file.parent() {
            fs::create_dir_all(parent).map_err(|source| RemedyError::Store {
                action: "create",
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let tmp = self.state_file.with_extension("yaml.tmp");
        fs::write(&tmp, yaml).map_err(|source| RemedyError::Store {
            action: "write",
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.state_file).map_err(|source| RemedyError::Store {
            action: "replace",
            path: self.state_file.clone(),
            source,
        })?;
        tracing::trace!(path = %self.state_file.display(), "session saved");
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        if self.exists() {
            fs::remove_file(&self.state_file).map_err(|source| RemedyError::Store {
                action: "remove",
                path: self.state_file.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
