//! Full pipeline: `remedy run` and `remedy resume`.

use anyhow::Result;
use remedy::config::Config;
use remedy::gates::ApprovalGate;
use remedy::session::{Category, SessionDocument, SessionMode};
use remedy::ui::RemediationUI;

use super::session::start_session;
use super::{load_session, open_driver, resolve_categories};

/// Start a new session and run the pipeline over it.
///
/// Fails when a session already exists; `resume` continues it and
/// `init --force` replaces it.
pub fn cmd_run(
    config: &Config,
    goal: &str,
    mode: SessionMode,
    categories: Option<&str>,
) -> Result<()> {
    let categories = resolve_categories(config, categories)?;
    let mut doc = start_session(config, goal, mode, false)?;
    println!("Started session {} ({mode})", doc.session.id);
    drive(config, &mut doc, &categories)
}

/// Rescan and continue the existing session in its recorded mode.
pub fn cmd_resume(config: &Config) -> Result<()> {
    let mut doc = load_session(config)?;
    let categories = config.remedy_config().categories().to_vec();
    println!("Resuming session {} ({})", doc.session.id, doc.session.mode);
    drive(config, &mut doc, &categories)
}

fn drive(config: &Config, doc: &mut SessionDocument, categories: &[Category]) -> Result<()> {
    let mut driver = open_driver(config)?;
    let mut gate = ApprovalGate::new(config.yes);
    let mut ui = RemediationUI::new(config.verbose);

    let summary = driver.run(doc, categories, &mut gate, &mut ui)?;
    ui.finish(&summary);
    Ok(())
}
