//! Single-step commands: `remedy scan`, `fix`, `verify`, `test` and `rollback`.
//!
//! Each loads the session, performs one engine operation and persists the
//! result. Input errors (unknown id, wrong status) surface as a non-zero exit
//! with the session untouched.

use anyhow::Result;
use console::style;
use remedy::config::Config;
use remedy::engine::FixOutcome;
use remedy::session::{CheckStatus, SessionMode};
use remedy::tracker::short_sha;
use remedy::ui::icons::{CHECK, CROSS, REVIEW, TEST};

use super::{load_session, open_driver, resolve_categories};

pub fn cmd_scan(config: &Config, categories: Option<&str>) -> Result<()> {
    let mut doc = load_session(config)?;
    let categories = resolve_categories(config, categories)?;
    let mut driver = open_driver(config)?;

    let summary = driver.scan(&mut doc, &categories)?;

    let names: Vec<&str> = categories.iter().map(|c| c.as_str()).collect();
    println!();
    println!("Scanned {} for {}", config.project_dir.display(), names.join(", "));
    println!("  Found:   {}", summary.found);
    println!("  New:     {}", style(summary.added).green());
    println!("  Known:   {}", summary.known);
    println!("  Ignored: {}", style(summary.ignored).dim());
    if doc.session.mode == SessionMode::ScanOnly {
        println!();
        println!("Session is scan-only; findings are recorded but never fixed.");
    }
    Ok(())
}

pub fn cmd_fix(config: &Config, id: &str) -> Result<()> {
    let mut doc = load_session(config)?;
    let mut driver = open_driver(config)?;

    match driver.engine().fix(&mut doc, id)? {
        FixOutcome::Applied { confidence, diff } => {
            println!("{}Fixed {} (confidence {:.2})", CHECK, style(id).bold(), confidence);
            for line in diff.lines() {
                let styled = if line.starts_with('-') {
                    style(line).red()
                } else {
                    style(line).green()
                };
                println!("  {styled}");
            }
            println!();
            println!("Run `remedy verify {id}` to check the fix.");
        }
        FixOutcome::Rejected { reason } => {
            println!("{}Draft for {} rejected: {}", CROSS, style(id).bold(), reason);
            println!("The file was not modified; `remedy fix {id}` drafts again.");
        }
        FixOutcome::Escalated { reason } => {
            println!("{}{} moved to needs_review: {}", REVIEW, style(id).bold(), reason);
            println!("`remedy fix {id}` starts a new attempt cycle.");
        }
        FixOutcome::ManualReview { reason } => {
            println!("{}{} needs manual review: {}", REVIEW, style(id).bold(), reason);
            if let Some(prompt) = doc
                .bug(id)
                .and_then(|b| b.fix.as_ref())
                .and_then(|f| f.manual_prompt.as_deref())
            {
                println!();
                println!("{}", style(prompt).dim());
            }
        }
    }
    Ok(())
}

pub fn cmd_verify(config: &Config, id: &str) -> Result<()> {
    let mut doc = load_session(config)?;
    let mut driver = open_driver(config)?;

    let report = driver.engine().verify(&mut doc, id)?;

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Passed => style("pass").green(),
            CheckStatus::Failed => style("FAIL").red(),
            CheckStatus::Skipped => style("skip").dim(),
        };
        println!("  [{}] {:<8} {}", marker, check.name, style(&check.message).dim());
    }
    println!();
    if report.passed {
        println!(
            "{}{} verified (confidence {:.2})",
            CHECK,
            style(id).bold(),
            report.confidence
        );
    } else {
        println!(
            "{}{} failed verification (confidence {:.2}{})",
            CROSS,
            style(id).bold(),
            report.confidence,
            if report.retryable { ", retryable" } else { "" }
        );
        for issue in &report.issues {
            println!("  - {issue}");
        }
    }
    Ok(())
}

pub fn cmd_test(config: &Config, id: &str) -> Result<()> {
    let mut doc = load_session(config)?;
    let mut driver = open_driver(config)?;

    let path = driver.engine().generate_test(&mut doc, id)?;
    println!("{}Regression test for {} written to {}", TEST, style(id).bold(), path.display());
    Ok(())
}

pub fn cmd_rollback(config: &Config, id: &str) -> Result<()> {
    let mut doc = load_session(config)?;
    let mut driver = open_driver(config)?;

    let sha = driver.engine().rollback(&mut doc, id)?;
    println!(
        "Rolled back {} to checkpoint {}; the bug is pending again",
        style(id).bold(),
        short_sha(&sha)
    );
    Ok(())
}
