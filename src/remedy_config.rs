//! File-backed configuration read from `.remedy/remedy.toml`.
//!
//! Values are layered file → environment → CLI:
//!
//! ```toml
//! [pipeline]
//! max_steps = 50
//! max_attempts = 5
//! pass_threshold = 0.5
//! retry_floor = 0.2
//! categories = ["security", "auth", "logic"]
//!
//! [verify]
//! syntax_timeout_secs = 15
//! import_timeout_secs = 15
//! lint_timeout_secs = 30
//! test_timeout_secs = 60
//! ```
//!
//! `REMEDY_MAX_STEPS` and `REMEDY_MAX_ATTEMPTS` override the file; the
//! `--max-steps` flag overrides both.

use crate::engine::RetryPolicy;
use crate::errors::RemedyError;
use crate::session::Category;
use crate::verify::VerifySettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "remedy.toml";
pub const MAX_STEPS_ENV: &str = "REMEDY_MAX_STEPS";
pub const MAX_ATTEMPTS_ENV: &str = "REMEDY_MAX_ATTEMPTS";

/// Orchestration limits and thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Run-level ceiling on scan/fix/verify/test-generation calls
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Fix drafts allowed per bug
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
    #[serde(default = "default_retry_floor")]
    pub retry_floor: f64,
    /// Detector categories scanned when none are given on the command line
    #[serde(default = "default_categories")]
    pub categories: Vec<Category>,
}

fn default_max_steps() -> u32 {
    50
}

fn default_max_attempts() -> u32 {
    5
}

fn default_pass_threshold() -> f64 {
    0.5
}

fn default_retry_floor() -> f64 {
    0.2
}

fn default_categories() -> Vec<Category> {
    vec![Category::Security, Category::Auth, Category::Logic]
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_attempts: default_max_attempts(),
            pass_threshold: default_pass_threshold(),
            retry_floor: default_retry_floor(),
            categories: default_categories(),
        }
    }
}

/// Per-stage timeouts for external verification tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifySection {
    #[serde(default = "default_short_timeout")]
    pub syntax_timeout_secs: u64,
    #[serde(default = "default_short_timeout")]
    pub import_timeout_secs: u64,
    #[serde(default = "default_lint_timeout")]
    pub lint_timeout_secs: u64,
    #[serde(default = "default_test_timeout")]
    pub test_timeout_secs: u64,
}

fn default_short_timeout() -> u64 {
    15
}

fn default_lint_timeout() -> u64 {
    30
}

fn default_test_timeout() -> u64 {
    60
}

impl Default for VerifySection {
    fn default() -> Self {
        Self {
            syntax_timeout_secs: default_short_timeout(),
            import_timeout_secs: default_short_timeout(),
            lint_timeout_secs: default_lint_timeout(),
            test_timeout_secs: default_test_timeout(),
        }
    }
}

/// Parsed remedy.toml.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemedyToml {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub verify: VerifySection,
}

impl RemedyToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse remedy.toml")
    }

    /// Load `remedy.toml` from `remedy_dir`, or defaults when it doesn't exist.
    pub fn load_or_default(remedy_dir: &Path) -> Result<Self> {
        let config_path = remedy_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize remedy.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Problems that would make the pipeline misbehave. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let p = &self.pipeline;

        if !(0.0..=1.0).contains(&p.pass_threshold) {
            errors.push(format!(
                "pipeline.pass_threshold {} must be between 0 and 1",
                p.pass_threshold
            ));
        }
        if p.retry_floor < 0.0 || p.retry_floor >= p.pass_threshold {
            errors.push(format!(
                "pipeline.retry_floor {} must be at least 0 and below pass_threshold {}",
                p.retry_floor, p.pass_threshold
            ));
        }
        if p.max_attempts == 0 {
            errors.push("pipeline.max_attempts must be at least 1".to_string());
        }
        if p.max_steps == 0 {
            errors.push("pipeline.max_steps must be at least 1".to_string());
        }
        if p.categories.is_empty() {
            errors.push("pipeline.categories must name at least one category".to_string());
        }

        let v = &self.verify;
        for (name, secs) in [
            ("syntax_timeout_secs", v.syntax_timeout_secs),
            ("import_timeout_secs", v.import_timeout_secs),
            ("lint_timeout_secs", v.lint_timeout_secs),
            ("test_timeout_secs", v.test_timeout_secs),
        ] {
            if secs == 0 {
                errors.push(format!("verify.{name} must be greater than 0"));
            }
        }

        errors
    }
}

/// Read a positive integer override from the environment.
fn env_u32(name: &str) -> Option<u32> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u32>() {
        Ok(v) if v > 0 => Some(v),
        _ => {
            tracing::warn!(variable = name, value = %raw, "ignoring invalid override");
            None
        }
    }
}

/// remedy.toml plus environment and CLI overrides for one project.
#[derive(Debug, Clone)]
pub struct RemedyConfig {
    pub project_dir: PathBuf,
    pub remedy_dir: PathBuf,
    pub toml: RemedyToml,
    /// CLI override for max_steps (if specified)
    pub cli_max_steps: Option<u32>,
}

impl RemedyConfig {
    /// `project_dir` must already be canonical.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let remedy_dir = project_dir.join(".remedy");
        let toml = RemedyToml::load_or_default(&remedy_dir)?;

        Ok(Self {
            project_dir,
            remedy_dir,
            toml,
            cli_max_steps: None,
        })
    }

    pub fn with_cli_args(project_dir: PathBuf, max_steps: Option<u32>) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.cli_max_steps = max_steps;
        Ok(config)
    }

    /// CLI → env → file.
    pub fn max_steps(&self) -> u32 {
        self.cli_max_steps
            .or_else(|| env_u32(MAX_STEPS_ENV))
            .unwrap_or(self.toml.pipeline.max_steps)
    }

    /// Env → file.
    pub fn max_attempts(&self) -> u32 {
        env_u32(MAX_ATTEMPTS_ENV).unwrap_or(self.toml.pipeline.max_attempts)
    }

    pub fn categories(&self) -> &[Category] {
        &self.toml.pipeline.categories
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts(),
            pass_threshold: self.toml.pipeline.pass_threshold,
            retry_floor: self.toml.pipeline.retry_floor,
        }
    }

    pub fn verify_settings(&self) -> VerifySettings {
        let v = &self.toml.verify;
        VerifySettings {
            pass_threshold: self.toml.pipeline.pass_threshold,
            retry_floor: self.toml.pipeline.retry_floor,
            syntax_timeout: Duration::from_secs(v.syntax_timeout_secs),
            import_timeout: Duration::from_secs(v.import_timeout_secs),
            lint_timeout: Duration::from_secs(v.lint_timeout_secs),
            test_timeout: Duration::from_secs(v.test_timeout_secs),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.remedy_dir.join(CONFIG_FILE)
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }

    /// Fail when remedy.toml would make the pipeline misbehave.
    pub fn ensure_valid(&self) -> crate::errors::Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            return Ok(());
        }
        Err(RemedyError::Config(format!(
            "{} in {}",
            errors.join("; "),
            self.config_file().display()
        )))
    }
}
