//! Session lifecycle commands: `remedy init` and `remedy status`.

use anyhow::Result;
use console::style;
use remedy::config::Config;
use remedy::errors::RemedyError;
use remedy::ignore::IgnoreRulesFile;
use remedy::session::{BugStatus, SessionDocument, SessionMode, SessionStore};
use remedy::tracker::short_sha;

use super::{load_session, open_driver};

/// Create `.remedy/`, seed the ignore rules and persist a fresh session
/// with its "Session initialized" checkpoint.
///
/// Refuses to replace an existing session unless `force` is set.
pub fn start_session(
    config: &Config,
    goal: &str,
    mode: SessionMode,
    force: bool,
) -> Result<SessionDocument> {
    let store = SessionStore::new(config.state_file.clone());
    if store.exists() {
        if !force {
            return Err(RemedyError::SessionExists {
                path: config.state_file.clone(),
            }
            .into());
        }
        store.reset()?;
        tracing::info!(path = %config.state_file.display(), "existing session replaced");
    }

    config.ensure_directories()?;
    if IgnoreRulesFile::write_default_if_missing(&config.ignore_rules_file)? {
        tracing::debug!(path = %config.ignore_rules_file.display(), "default ignore rules written");
    }

    let mut driver = open_driver(config)?;
    let engine = driver.engine();
    let mut doc = SessionDocument::new(goal, mode, &config.project_dir);
    engine.save(&mut doc)?;
    if let Err(e) = engine.checkpoint(&mut doc, "Session initialized") {
        tracing::warn!(error = %e, "initial checkpoint failed");
    }
    tracing::info!(session = %doc.session.id, mode = %mode, "session started");
    Ok(doc)
}

pub fn cmd_init(config: &Config, goal: &str, mode: SessionMode, force: bool) -> Result<()> {
    let doc = start_session(config, goal, mode, force)?;

    println!(
        "Initialized remedy session {} at {}",
        style(&doc.session.id).bold(),
        config.remedy_dir.display()
    );
    println!();
    println!("  .remedy/");
    println!("  ├── state.yaml          # Session document");
    println!("  ├── ignore-rules.yaml   # Suppression rules");
    println!("  └── .gitignore          # Keeps session state out of checkpoints");
    println!();
    match doc.checkpoints.last() {
        Some(cp) => println!("Checkpoint: {}", short_sha(&cp.sha)),
        None => println!("Checkpoints unavailable (not a git repository); rollback is disabled"),
    }
    println!();
    println!("Next steps:");
    println!("  1. Run `remedy scan` to discover bugs");
    println!("  2. Run `remedy resume` to fix, verify and test them");
    Ok(())
}

pub fn cmd_status(config: &Config) -> Result<()> {
    let mut doc = load_session(config)?;
    doc.refresh_stats();
    let stats = &doc.stats;

    println!();
    println!("Session: {}", style(&doc.session.id).bold());
    println!("Goal:    {}", doc.session.goal);
    println!("Mode:    {}", doc.session.mode);
    println!("Started: {}", doc.session.started.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();
    println!("Bugs: {}", stats.total);
    println!("  {:<13} {}", "pending:", stats.pending);
    println!("  {:<13} {}", "fixing:", stats.fixing);
    println!("  {:<13} {}", "fixed:", stats.fixed);
    println!("  {:<13} {}", "verified:", style(stats.verified).green());
    println!("  {:<13} {}", "needs_review:", style(stats.needs_review).yellow());
    println!("  {:<13} {}", "ignored:", style(stats.ignored).dim());
    println!();
    println!(
        "Context: {} file(s) extracted, ~{} tokens saved",
        stats.files_extracted, stats.tokens_saved
    );
    match doc.checkpoints.last() {
        Some(cp) => println!(
            "Checkpoints: {} (last {} \"{}\")",
            doc.checkpoints.len(),
            short_sha(&cp.sha),
            cp.msg
        ),
        None => println!("Checkpoints: none"),
    }

    let open = doc.queue(&[BugStatus::Pending, BugStatus::Fixing, BugStatus::Fixed]);
    if !open.is_empty() {
        println!();
        println!("{:<9} {:<10} {:<13} Location", "Bug", "Severity", "Status");
        for bug in open.iter().filter_map(|id| doc.bug(id)).take(10) {
            println!(
                "{:<9} {:<10} {:<13} {}:{}",
                bug.id,
                bug.severity,
                bug.status,
                bug.location.file.display(),
                bug.location.line
            );
        }
        if open.len() > 10 {
            println!("... and {} more", open.len() - 10);
        }
    }
    println!();
    Ok(())
}
