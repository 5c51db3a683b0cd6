use super::VersionControl;
use anyhow::{Context, Result};
use git2::{IndexAddOption, Oid, Repository, ResetType, Signature};
use std::path::Path;

pub struct GitTracker {
    repo: Repository,
}

impl GitTracker {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let repo = Repository::open(project_dir).context("Failed to open git repository")?;
        Ok(Self { repo })
    }

    /// Get the HEAD commit if it exists (returns None for unborn branches)
    fn get_head_commit(&self) -> Option<git2::Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }

    fn signature(&self) -> Result<Signature<'static>> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Signature::now("remedy", "remedy@localhost").context("Failed to build signature"),
        }
    }

    /// Get current HEAD SHA (returns None for unborn branches)
    pub fn head_sha(&self) -> Option<String> {
        self.get_head_commit().map(|c| c.id().to_string())
    }
}

impl VersionControl for GitTracker {
    /// Stage everything (respecting .gitignore) and commit. An unchanged tree
    /// still produces a new, empty commit.
    fn commit_all(&self, message: &str) -> Result<String> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        // Pick up deletions as well as additions/modifications
        index.update_all(["*"].iter(), None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let sig = self.signature()?;

        // Handle unborn branch (new repo with no commits yet)
        let commit_id = if let Some(parent) = self.get_head_commit() {
            self.repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?
        } else {
            self.repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[])?
        };

        Ok(commit_id.to_string())
    }

    /// Discard working-tree and index changes and move HEAD to `sha`.
    fn reset_hard(&self, sha: &str) -> Result<()> {
        let oid = Oid::from_str(sha).with_context(|| format!("Invalid commit reference {sha}"))?;
        let target = self
            .repo
            .find_object(oid, None)
            .with_context(|| format!("Commit {sha} not found"))?;
        let mut checkout = git2::build::CheckoutBuilder::new();
        checkout.force();
        self.repo
            .reset(&target, ResetType::Hard, Some(&mut checkout))
            .with_context(|| format!("Failed to reset to {sha}"))?;
        Ok(())
    }
}
