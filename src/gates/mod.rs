use crate::session::BugRecord;
use anyhow::Result;
use dialoguer::{Select, theme::ColorfulTheme};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    Approved,
    ApprovedAll, // User chose "process all remaining"
    Rejected,
    Aborted,
}

/// Asked before each bug in `confirm` mode.
pub trait BugGate {
    fn check_bug(&mut self, bug: &BugRecord, position: usize, total: usize) -> Result<GateDecision>;
}

pub struct ApprovalGate {
    pub skip_all: bool,
}

impl ApprovalGate {
    pub fn new(skip_all: bool) -> Self {
        Self { skip_all }
    }

    fn print_bug_header(bug: &BugRecord, position: usize, total: usize) {
        println!();
        println!(
            "{} [{}/{}] {} {}",
            console::style("▶").cyan(),
            position,
            total,
            console::style(&bug.id).bold(),
            bug.description
        );
        let cwe = bug.cwe.as_deref().map(|c| format!(" {c}")).unwrap_or_default();
        println!(
            "  {}:{} ({}{})",
            bug.location.file.display(),
            bug.location.line,
            bug.severity,
            cwe
        );
        println!("  {}", console::style(&bug.location.code).dim());
    }

    fn prompt_user(&mut self) -> Result<GateDecision> {
        let options = &[
            "Yes, fix this bug",
            "Yes, and process all remaining bugs (--yes)",
            "Skip this bug",
            "Abort the queue",
        ];

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Proceed with this bug?")
            .items(options)
            .default(0)
            .interact()?;

        match selection {
            0 => Ok(GateDecision::Approved),
            1 => {
                self.skip_all = true;
                Ok(GateDecision::ApprovedAll)
            }
            2 => Ok(GateDecision::Rejected),
            3 => Ok(GateDecision::Aborted),
            _ => unreachable!(),
        }
    }
}

impl BugGate for ApprovalGate {
    fn check_bug(&mut self, bug: &BugRecord, position: usize, total: usize) -> Result<GateDecision> {
        Self::print_bug_header(bug, position, total);

        // If --yes flag, auto-approve everything
        if self.skip_all {
            println!("  {} (--yes flag)", console::style("Auto-approved").dim());
            return Ok(GateDecision::Approved);
        }

        self.prompt_user()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Severity;
    use crate::session::tests::sample_bug;

    #[test]
    fn test_skip_all_auto_approves_without_prompting() {
        let mut gate = ApprovalGate::new(true);
        let bug = sample_bug("B000001", Severity::High, 0.8);
        assert_eq!(gate.check_bug(&bug, 1, 3).unwrap(), GateDecision::Approved);
        assert!(gate.skip_all);
    }
}
