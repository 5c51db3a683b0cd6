//! Read-only views over a session document.

use crate::session::{BugStatus, SessionDocument, Severity};
use anyhow::Result;
use serde::Serialize;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    /// Counts per status and token savings
    #[default]
    Summary,
    /// Summary plus one block per bug
    Detailed,
    /// GitHub-flavoured markdown tables
    Markdown,
    /// The full session document
    Json,
    /// Thought/action/observation log for replay
    Trajectory,
}

/// Bugs listed in the markdown table before truncation.
const MARKDOWN_BUG_LIMIT: usize = 20;

#[derive(Debug, Default)]
pub struct Reporter;

impl Reporter {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, doc: &SessionDocument, format: ReportFormat) -> Result<String> {
        Ok(match format {
            ReportFormat::Summary => summary(doc),
            ReportFormat::Detailed => detailed(doc),
            ReportFormat::Markdown => markdown(doc),
            ReportFormat::Json => serde_json::to_string_pretty(doc)?,
            ReportFormat::Trajectory => serde_json::to_string_pretty(&trajectory(doc))?,
        })
    }
}

fn count(doc: &SessionDocument, status: BugStatus) -> usize {
    doc.bugs.iter().filter(|b| b.status == status).count()
}

fn summary(doc: &SessionDocument) -> String {
    let rule = "=".repeat(60);
    let thin = "-".repeat(40);
    let mut out = String::new();
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "REMEDY SESSION REPORT");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Session: {}", doc.session.id);
    let _ = writeln!(out, "Goal:    {}", doc.session.goal);
    let _ = writeln!(out, "Mode:    {}", doc.session.mode);
    let _ = writeln!(out, "Project: {}", doc.session.project.display());
    let _ = writeln!(out);
    let _ = writeln!(out, "BUGS");
    let _ = writeln!(out, "{thin}");
    let _ = writeln!(out, "Total found:    {}", doc.bugs.len());
    for status in BugStatus::ALL {
        let _ = writeln!(out, "  {:<13} {}", format!("{status}:"), count(doc, status));
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "CONTEXT");
    let _ = writeln!(out, "{thin}");
    let _ = writeln!(out, "Files extracted: {}", doc.context.files_extracted);
    let _ = writeln!(out, "Tokens saved:    ~{}", doc.context.tokens_saved);
    let _ = writeln!(out, "Checkpoints:     {}", doc.checkpoints.len());
    let _ = writeln!(out, "{rule}");
    out
}

fn detailed(doc: &SessionDocument) -> String {
    let mut out = summary(doc);
    let _ = writeln!(out);
    let _ = writeln!(out, "BUG DETAILS");
    let _ = writeln!(out, "{}", "-".repeat(50));

    for bug in &doc.bugs {
        let _ = writeln!(out);
        let _ = writeln!(out, "[{}] {} ({})", bug.id, bug.description, bug.status);
        let _ = writeln!(
            out,
            "   File: {}:{}",
            bug.location.file.display(),
            bug.location.line
        );
        let _ = writeln!(
            out,
            "   Category: {} | Severity: {} | Confidence: {:.0}%",
            bug.category,
            bug.severity,
            bug.confidence * 100.0
        );
        if let Some(cwe) = &bug.cwe {
            let _ = writeln!(out, "   CWE: {cwe}");
        }
        if let Some(rule) = &bug.ignore_rule {
            let _ = writeln!(out, "   Ignored by rule: {rule}");
        }
        if let Some(fix) = &bug.fix {
            let _ = writeln!(
                out,
                "   Fix confidence: {:.0}% | Attempts: {}",
                fix.confidence * 100.0,
                fix.attempts
            );
            if let Some(reason) = &fix.rejected {
                let _ = writeln!(out, "   Last draft rejected: {reason}");
            }
        }
        if let Some(v) = &bug.verification {
            let _ = writeln!(
                out,
                "   Verification: {} ({:.0}%)",
                if v.passed { "passed" } else { "failed" },
                v.confidence * 100.0
            );
            for issue in &v.issues {
                let _ = writeln!(out, "     - {issue}");
            }
        }
        if let Some(test) = &bug.test_generated {
            let _ = writeln!(out, "   Test: {}", test.display());
        }
        if let Some(reason) = &bug.escalation {
            let _ = writeln!(out, "   Escalated: {reason}");
        }
        if let Some(err) = &bug.last_error {
            let _ = writeln!(out, "   Last error: {err}");
        }
    }
    out
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn markdown(doc: &SessionDocument) -> String {
    let mut lines = vec![
        "# Remedy Session Report".to_string(),
        String::new(),
        format!("**Session**: `{}`", doc.session.id),
        format!("**Goal**: {}", doc.session.goal),
        format!("**Mode**: {}", doc.session.mode),
        String::new(),
        "## Summary".to_string(),
        String::new(),
        "| Status | Count |".to_string(),
        "|--------|-------|".to_string(),
    ];
    for status in BugStatus::ALL {
        lines.push(format!("| {} | {} |", status, count(doc, status)));
    }
    lines.push(format!("| **Total** | **{}** |", doc.bugs.len()));

    lines.extend([
        String::new(),
        "## By Severity".to_string(),
        String::new(),
        "| Severity | Count |".to_string(),
        "|----------|-------|".to_string(),
    ]);
    for severity in Severity::ALL {
        let n = doc.bugs.iter().filter(|b| b.severity == severity).count();
        if n > 0 {
            lines.push(format!("| {} | {} |", title_case(severity.as_str()), n));
        }
    }

    if !doc.bugs.is_empty() {
        lines.extend([
            String::new(),
            "## Bug Details".to_string(),
            String::new(),
            "| ID | Severity | Description | Location | Status |".to_string(),
            "|----|----------|-------------|----------|--------|".to_string(),
        ]);
        for bug in doc.bugs.iter().take(MARKDOWN_BUG_LIMIT) {
            let cwe = bug.cwe.as_deref().map(|c| format!(" ({c})")).unwrap_or_default();
            lines.push(format!(
                "| {} | {} | {}{} | `{}:{}` | {} |",
                bug.id,
                bug.severity,
                bug.description,
                cwe,
                bug.file_name(),
                bug.location.line,
                bug.status
            ));
        }
        if doc.bugs.len() > MARKDOWN_BUG_LIMIT {
            lines.push(String::new());
            lines.push(format!(
                "*... and {} more bugs*",
                doc.bugs.len() - MARKDOWN_BUG_LIMIT
            ));
        }
    }

    lines.extend([
        String::new(),
        "## Context Efficiency".to_string(),
        String::new(),
        format!("- Files extracted: {}", doc.context.files_extracted),
        format!("- Tokens saved: ~{}", doc.context.tokens_saved),
        format!("- Checkpoints: {}", doc.checkpoints.len()),
    ]);
    lines.join("\n")
}

#[derive(Debug, Serialize)]
struct Step {
    thought: String,
    action: String,
    observation: String,
}

#[derive(Debug, Serialize)]
struct TrajectoryStats {
    bugs_found: usize,
    bugs_fixed: usize,
    bugs_verified: usize,
    bugs_needs_review: usize,
    tokens_saved: u64,
    checkpoints: usize,
}

#[derive(Debug, Serialize)]
struct TrajectoryInfo {
    exit_status: &'static str,
    stats: TrajectoryStats,
}

#[derive(Debug, Serialize)]
struct Trajectory {
    trajectory: Vec<Step>,
    info: TrajectoryInfo,
}

fn step(thought: String, action: String, observation: String) -> Step {
    Step {
        thought,
        action,
        observation,
    }
}

fn trajectory(doc: &SessionDocument) -> Trajectory {
    let mut steps = vec![step(
        format!("Starting remediation session: {}", doc.session.goal),
        format!("init --mode {}", doc.session.mode),
        format!("Session {} started", doc.session.id),
    )];

    for bug in &doc.bugs {
        let file = bug.file_name();
        steps.push(step(
            format!(
                "Found {} at {}:{}",
                bug.description, file, bug.location.line
            ),
            format!("scan --file {file}"),
            format!(
                "Bug {} ({}) confidence {:.0}%",
                bug.id,
                bug.cwe.as_deref().unwrap_or("N/A"),
                bug.confidence * 100.0
            ),
        ));
        if let Some(rule) = &bug.ignore_rule {
            steps.push(step(
                format!("Checking ignore rules for {}", bug.id),
                "filter".to_string(),
                format!("Ignored by rule {rule}"),
            ));
        }
        if let Some(fix) = &bug.fix {
            steps.push(step(
                format!("Generating fix for {}", bug.id),
                format!("fix {}", bug.id),
                format!(
                    "Fix drafted with {:.0}% confidence, {} attempt(s)",
                    fix.confidence * 100.0,
                    fix.attempts
                ),
            ));
        }
        if let Some(v) = &bug.verification {
            steps.push(step(
                format!("Verifying fix for {}", bug.id),
                format!("verify {}", bug.id),
                if v.passed {
                    "Verification passed".to_string()
                } else {
                    format!("Verification failed: {}", v.issues.join("; "))
                },
            ));
        }
        if let Some(test) = &bug.test_generated {
            steps.push(step(
                format!("Generating regression test for {}", bug.id),
                format!("test {}", bug.id),
                format!("Test created: {}", test.display()),
            ));
        }
        if let Some(reason) = &bug.escalation {
            steps.push(step(
                format!("Giving up on {}", bug.id),
                "escalate".to_string(),
                format!("Needs review: {reason}"),
            ));
        }
    }

    let open = count(doc, BugStatus::Pending) + count(doc, BugStatus::Fixing) + count(doc, BugStatus::Fixed);
    Trajectory {
        trajectory: steps,
        info: TrajectoryInfo {
            exit_status: if open == 0 { "completed" } else { "in_progress" },
            stats: TrajectoryStats {
                bugs_found: doc.bugs.len(),
                bugs_fixed: count(doc, BugStatus::Fixed),
                bugs_verified: count(doc, BugStatus::Verified),
                bugs_needs_review: count(doc, BugStatus::NeedsReview),
                tokens_saved: doc.context.tokens_saved,
                checkpoints: doc.checkpoints.len(),
            },
        },
    }
}
