use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::remedy_config::{CONFIG_FILE, RemedyConfig};

pub const STATE_FILE: &str = "state.yaml";
pub const IGNORE_RULES_FILE: &str = "ignore-rules.yaml";

/// Runtime configuration for one remedy invocation.
///
/// Resolves every path under `.remedy/` and carries the layered
/// [`RemedyConfig`] along with the global CLI flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub remedy_dir: PathBuf,
    pub state_file: PathBuf,
    pub ignore_rules_file: PathBuf,
    pub config_file: PathBuf,
    pub verbose: bool,
    /// Auto-approve every confirm-mode gate.
    pub yes: bool,
    remedy_config: RemedyConfig,
}

impl Config {
    pub fn new(
        project_dir: PathBuf,
        verbose: bool,
        yes: bool,
        max_steps: Option<u32>,
    ) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;

        let remedy_config = RemedyConfig::with_cli_args(project_dir.clone(), max_steps)?;
        remedy_config.ensure_valid()?;
        let remedy_dir = remedy_config.remedy_dir.clone();

        Ok(Self {
            state_file: remedy_dir.join(STATE_FILE),
            ignore_rules_file: remedy_dir.join(IGNORE_RULES_FILE),
            config_file: remedy_dir.join(CONFIG_FILE),
            project_dir,
            remedy_dir,
            verbose,
            yes,
            remedy_config,
        })
    }

    pub fn remedy_config(&self) -> &RemedyConfig {
        &self.remedy_config
    }

    /// Create `.remedy/` and keep its contents out of the project's history.
    ///
    /// Checkpoint commits stage the whole tree; the session document must not
    /// be part of them or a rollback would rewind the session too.
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.remedy_dir).context("Failed to create .remedy directory")?;
        let gitignore = self.remedy_dir.join(".gitignore");
        if !gitignore.exists() {
            std::fs::write(&gitignore, "*\n").context("Failed to write .remedy/.gitignore")?;
        }
        Ok(())
    }
}
