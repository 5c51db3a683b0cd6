//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled                          |
//! |-----------|-------------------------------------------|
//! | `session` | `Init`, `Status`                          |
//! | `bug`     | `Scan`, `Fix`, `Verify`, `Test`, `Rollback` |
//! | `run`     | `Run`, `Resume`                           |
//! | `report`  | `Report`                                  |
//! | `config`  | `Config`                                  |

pub mod bug;
pub mod config;
pub mod report;
pub mod run;
pub mod session;

pub use bug::{cmd_fix, cmd_rollback, cmd_scan, cmd_test, cmd_verify};
pub use config::cmd_config;
pub use report::cmd_report;
pub use run::{cmd_resume, cmd_run};
pub use session::{cmd_init, cmd_status};

use anyhow::{Context, Result};
use remedy::config::Config;
use remedy::engine::{BugLifecycleEngine, Collaborators};
use remedy::ignore::IgnoreFilter;
use remedy::pipeline::PipelineDriver;
use remedy::scanner::PatternScanner;
use remedy::session::{Category, SessionDocument, SessionStore, parse_categories};
use remedy::tracker::CheckpointLedger;

/// Wire the default collaborators into a driver for `config`'s project.
pub fn open_driver(config: &Config) -> Result<PipelineDriver> {
    use remedy::context::ContextExtractor;
    use remedy::fixer::TemplateFixer;
    use remedy::testgen::TemplateTestGenerator;
    use remedy::verify::StagedVerifier;

    let settings = config.remedy_config();
    let filter =
        IgnoreFilter::load(&config.ignore_rules_file).context("Failed to load ignore rules")?;
    tracing::debug!(rules = filter.len(), "ignore rules loaded");

    let collab = Collaborators {
        fixer: Box::new(TemplateFixer::new()),
        verifier: Box::new(StagedVerifier::new(settings.verify_settings())),
        tests: Box::new(TemplateTestGenerator::new()),
        context: ContextExtractor::new(),
    };
    let engine = BugLifecycleEngine::new(
        config.project_dir.clone(),
        SessionStore::new(config.state_file.clone()),
        CheckpointLedger::open(&config.project_dir),
        filter,
        collab,
        settings.retry_policy(),
    );

    Ok(PipelineDriver::new(
        engine,
        Box::new(PatternScanner::new()),
        settings.max_steps(),
    ))
}

/// Load the session, failing with `NoSession` when none exists.
pub fn load_session(config: &Config) -> Result<SessionDocument> {
    Ok(SessionStore::new(config.state_file.clone()).load()?)
}

/// `--categories` when given, else the configured list.
pub fn resolve_categories(config: &Config, flag: Option<&str>) -> Result<Vec<Category>> {
    match flag {
        Some(list) => {
            let categories = parse_categories(list)?;
            if categories.is_empty() {
                anyhow::bail!("--categories must name at least one category");
            }
            Ok(categories)
        }
        None => Ok(config.remedy_config().categories().to_vec()),
    }
}
