use crate::pipeline::{PipelineObserver, RunSummary};
use crate::session::{BugRecord, BugStatus};
use crate::ui::icons::{BLOCKER, CHECK, CROSS, REVIEW, SKIP, SPARKLE, TEST, WRENCH};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal UI for a pipeline run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Queue bar, tracking how many queued bugs have been processed
/// - Bug bar, a spinner naming the bug in flight
pub struct RemediationUI {
    multi: MultiProgress,
    queue_bar: ProgressBar,
    bug_bar: ProgressBar,
    verbose: bool,
}

impl RemediationUI {
    pub fn new(verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let queue_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let queue_bar = multi.add(ProgressBar::new(0));
        queue_bar.set_style(queue_style);
        queue_bar.set_prefix(" Bugs");

        let bug_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let bug_bar = multi.add(ProgressBar::new_spinner());
        bug_bar.set_style(bug_style);
        bug_bar.set_prefix("  Now");

        Self {
            multi,
            queue_bar,
            bug_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Clear both bars and print the run tallies.
    pub fn finish(&self, summary: &RunSummary) {
        self.bug_bar.finish_and_clear();
        self.queue_bar.finish_and_clear();
        print_summary(summary);
    }
}

impl PipelineObserver for RemediationUI {
    fn queued(&mut self, total: usize) {
        self.queue_bar.set_length(total as u64);
        self.queue_bar.set_message(format!("{total} queued"));
    }

    fn bug_started(&mut self, bug: &BugRecord) {
        self.bug_bar.set_message(format!(
            "{}{} {}",
            WRENCH,
            style(&bug.id).yellow(),
            style(format!("{}:{}", bug.location.file.display(), bug.location.line)).dim()
        ));
        self.bug_bar.enable_steady_tick(Duration::from_millis(100));
        if self.verbose {
            self.print_line(format!(
                "    {} {} {}",
                style("→").dim(),
                bug.id,
                style(&bug.description).dim()
            ));
        }
    }

    fn bug_finished(&mut self, bug: &BugRecord) {
        self.queue_bar.inc(1);
        let line = match bug.status {
            BugStatus::Verified => {
                let test = if bug.test_generated.is_some() {
                    format!(" {TEST}")
                } else {
                    String::new()
                };
                format!("{}{} verified{}", CHECK, style(&bug.id).green(), test)
            }
            BugStatus::NeedsReview => {
                let reason = bug
                    .escalation
                    .as_deref()
                    .or(bug.last_error.as_deref())
                    .unwrap_or("needs review");
                format!("{}{} {}", REVIEW, style(&bug.id).yellow(), style(reason).dim())
            }
            status => {
                let error = bug.last_error.as_deref().unwrap_or("");
                format!(
                    "{}{} {} {}",
                    CROSS,
                    style(&bug.id).red(),
                    status,
                    style(error).dim()
                )
            }
        };
        self.print_line(format!("  {line}"));
    }

    fn halted(&mut self, reason: &str) {
        self.print_line(format!("  {}{}", BLOCKER, style(reason).red().bold()));
    }
}

/// Print the per-run tallies shown after `run` and `resume`.
pub fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}{}", SPARKLE, style("Run complete").green().bold());
    println!("  Scanned:  {}", summary.scanned);
    println!("  Fixed:    {}", summary.fixed);
    println!("  Verified: {}", style(summary.verified).green());
    println!("  Tests:    {}", summary.tests);
    println!("  Failed:   {}", style(summary.failed).red());
    println!("  Skipped:  {}", summary.skipped);
    if summary.halted {
        println!("  {}Stopped at the step ceiling; run 'remedy resume' to continue", SKIP);
    }
}
