//! Pipeline driver: scan → filter → for each queued bug fix, verify with
//! retry and generate a test, then a final checkpoint.
//!
//! The driver never aborts the run because one bug failed; it records the
//! failure on the bug and moves on. The step ceiling is checked between
//! bugs, so a bug already in flight always finishes.

use crate::engine::{BugLifecycleEngine, IngestSummary};
use crate::errors::{RemedyError, Result as RemedyResult};
use crate::gates::{BugGate, GateDecision};
use crate::scanner::Scanner;
use crate::session::{BugRecord, BugStatus, Category, SessionDocument, SessionMode};
use anyhow::Result;

/// Per-run tallies printed at the end of `run` and `resume`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub scanned: usize,
    pub fixed: usize,
    pub verified: usize,
    pub tests: usize,
    /// Bugs ending in `needs_review` or erroring this run.
    pub failed: usize,
    /// Queued bugs not processed: declined, aborted or past the step ceiling.
    pub skipped: usize,
    /// The step ceiling stopped the run.
    pub halted: bool,
}

/// Progress hooks for the terminal UI.
pub trait PipelineObserver {
    fn queued(&mut self, _total: usize) {}
    fn bug_started(&mut self, _bug: &BugRecord) {}
    fn bug_finished(&mut self, _bug: &BugRecord) {}
    fn halted(&mut self, _reason: &str) {}
}

/// Observer that ignores everything.
pub struct Silent;

impl PipelineObserver for Silent {}

pub struct PipelineDriver {
    engine: BugLifecycleEngine,
    scanner: Box<dyn Scanner>,
    max_steps: u32,
}

impl PipelineDriver {
    pub fn new(engine: BugLifecycleEngine, scanner: Box<dyn Scanner>, max_steps: u32) -> Self {
        Self {
            engine,
            scanner,
            max_steps,
        }
    }

    pub fn engine(&mut self) -> &mut BugLifecycleEngine {
        &mut self.engine
    }

    /// Scan the project and merge the findings into `doc`.
    pub fn scan(
        &mut self,
        doc: &mut SessionDocument,
        categories: &[Category],
    ) -> RemedyResult<IngestSummary> {
        self.engine.count_step("scan");
        let candidates = self
            .scanner
            .scan(self.engine.root(), categories)
            .map_err(|e| RemedyError::Collaborator {
                operation: "scan",
                subject: self.engine.root().display().to_string(),
                message: format!("{e:#}"),
            })?;
        self.engine.ingest(doc, candidates)
    }

    pub fn run(
        &mut self,
        doc: &mut SessionDocument,
        categories: &[Category],
        gate: &mut dyn BugGate,
        observer: &mut dyn PipelineObserver,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let ingest = self.scan(doc, categories)?;
        summary.scanned = ingest.found;

        if doc.session.mode == SessionMode::ScanOnly {
            tracing::info!(found = ingest.found, "scan-only session; nothing fixed");
            return Ok(summary);
        }

        // fixed bugs are left over from an interrupted run and resume at verify
        let queue = doc.queue(&[BugStatus::Pending, BugStatus::Fixing, BugStatus::Fixed]);
        let confirm = doc.session.mode == SessionMode::Confirm;
        observer.queued(queue.len());
        tracing::info!(queued = queue.len(), mode = %doc.session.mode, "pipeline started");

        for (index, id) in queue.iter().enumerate() {
            let remaining = queue.len() - index;
            if self.engine.steps() >= self.max_steps {
                summary.skipped += remaining;
                summary.halted = true;
                let reason = format!(
                    "Step ceiling of {} reached; {} bug(s) left pending",
                    self.max_steps, remaining
                );
                tracing::warn!(steps = self.engine.steps(), remaining, "step ceiling reached");
                observer.halted(&reason);
                break;
            }

            let Some(bug) = doc.bug(id) else {
                continue;
            };
            if confirm {
                match gate.check_bug(bug, index + 1, queue.len())? {
                    GateDecision::Approved | GateDecision::ApprovedAll => {}
                    GateDecision::Rejected => {
                        tracing::info!(bug_id = %id, "skipped by operator");
                        summary.skipped += 1;
                        continue;
                    }
                    GateDecision::Aborted => {
                        tracing::info!(remaining, "queue aborted by operator");
                        summary.skipped += remaining;
                        break;
                    }
                }
            }
            observer.bug_started(bug);

            match self.engine.process(doc, id) {
                Ok(outcome) => {
                    if outcome.fix_applied {
                        summary.fixed += 1;
                    }
                    if outcome.status == BugStatus::Verified {
                        summary.verified += 1;
                    } else {
                        summary.failed += 1;
                    }
                    if outcome.test.is_some() {
                        summary.tests += 1;
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(bug_id = %id, error = %e, "bug failed; continuing");
                    if let Err(record) = self.engine.record_error(doc, id, &e.to_string()) {
                        tracing::error!(bug_id = %id, error = %record, "failed to record error");
                    }
                }
            }

            if let Some(bug) = doc.bug(id) {
                observer.bug_finished(bug);
            }
        }

        if let Err(e) = self.engine.checkpoint(doc, "Pipeline complete") {
            tracing::warn!(error = %e, "final checkpoint failed");
        }
        self.engine.save(doc)?;
        tracing::info!(
            fixed = summary.fixed,
            verified = summary.verified,
            failed = summary.failed,
            skipped = summary.skipped,
            "pipeline finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{Handles, ORIGINAL, Setup, build_engine};
    use crate::scanner::PatternScanner;
    use crate::session::SessionStore;
    use std::collections::VecDeque;
    use std::fs;
    use std::path::Path;

    const TWO_BUGS: &str = "import os\nimport yaml\nuser_cmd = input()\nos.system(user_cmd)\ndata = yaml.load(raw)\n";

    struct ScriptedGate(VecDeque<GateDecision>);

    impl BugGate for ScriptedGate {
        fn check_bug(&mut self, _bug: &BugRecord, _position: usize, _total: usize) -> Result<GateDecision> {
            Ok(self.0.pop_front().unwrap_or(GateDecision::Approved))
        }
    }

    #[derive(Default)]
    struct Recorder {
        started: Vec<String>,
        halted: Option<String>,
    }

    impl PipelineObserver for Recorder {
        fn bug_started(&mut self, bug: &BugRecord) {
            self.started.push(bug.id.clone());
        }

        fn halted(&mut self, reason: &str) {
            self.halted = Some(reason.to_string());
        }
    }

    fn project(content: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.py"), content).unwrap();
        fs::create_dir_all(dir.path().join("tests")).unwrap();
        fs::write(dir.path().join("tests/test_app.py"), ORIGINAL).unwrap();
        dir
    }

    fn driver(root: &Path, setup: Setup, max_steps: u32) -> (PipelineDriver, Handles) {
        let (engine, handles) = build_engine(root, setup);
        (
            PipelineDriver::new(engine, Box::new(PatternScanner::new()), max_steps),
            handles,
        )
    }

    fn run(
        driver: &mut PipelineDriver,
        doc: &mut SessionDocument,
        gate: &mut dyn BugGate,
    ) -> RunSummary {
        driver
            .run(doc, &[Category::Security], gate, &mut Silent)
            .unwrap()
    }

    #[test]
    fn test_full_run_processes_queue_and_ignores_test_files() {
        let dir = project(TWO_BUGS);
        let (mut driver, handles) = driver(dir.path(), Setup::default(), 50);
        let mut doc = SessionDocument::new("g", SessionMode::Auto, dir.path());
        let mut gate = ScriptedGate(VecDeque::new());

        let summary = run(&mut driver, &mut doc, &mut gate);

        assert_eq!(summary.scanned, 3);
        assert_eq!(summary.verified, 2);
        assert_eq!(summary.fixed, 2);
        assert_eq!(summary.tests, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(doc.stats.ignored, 1);
        assert_eq!(doc.stats.verified, 2);
        let commits = handles.vcs.as_ref().unwrap().commits.borrow().clone();
        assert_eq!(commits.last().map(String::as_str), Some("[remedy] Pipeline complete"));
        assert_eq!(doc.checkpoints.len(), 5);

        let persisted = SessionStore::new(dir.path().join(".remedy/state.yaml"))
            .load()
            .unwrap();
        assert_eq!(persisted.checkpoints.len(), 5);
    }

    #[test]
    fn test_failures_do_not_abort_the_run() {
        let dir = project(TWO_BUGS);
        let (mut driver, _handles) = driver(
            dir.path(),
            Setup {
                manual: true,
                ..Default::default()
            },
            50,
        );
        let mut doc = SessionDocument::new("g", SessionMode::Auto, dir.path());
        let summary = run(&mut driver, &mut doc, &mut ScriptedGate(VecDeque::new()));
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.verified, 0);
        assert_eq!(doc.stats.needs_review, 2);
    }

    #[test]
    fn test_step_ceiling_halts_between_bugs() {
        let dir = project(TWO_BUGS);
        // scan + fix + verify + testgen exhausts a ceiling of 4 after one bug
        let (mut driver, _handles) = driver(dir.path(), Setup::default(), 4);
        let mut doc = SessionDocument::new("g", SessionMode::Auto, dir.path());
        let mut recorder = Recorder::default();

        let summary = driver
            .run(
                &mut doc,
                &[Category::Security],
                &mut ScriptedGate(VecDeque::new()),
                &mut recorder,
            )
            .unwrap();

        assert!(summary.halted);
        assert_eq!(summary.verified, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(recorder.started.len(), 1);
        assert!(recorder.halted.unwrap().contains("Step ceiling of 4"));
        assert_eq!(doc.stats.pending, 1);
    }

    #[test]
    fn test_confirm_mode_skip_and_abort() {
        let dir = project(TWO_BUGS);
        let (mut driver, _handles) = driver(dir.path(), Setup::default(), 50);
        let mut doc = SessionDocument::new("g", SessionMode::Confirm, dir.path());
        let mut gate = ScriptedGate(VecDeque::from([GateDecision::Rejected, GateDecision::Aborted]));

        let summary = run(&mut driver, &mut doc, &mut gate);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.verified, 0);
        assert_eq!(doc.stats.pending, 2);
    }

    #[test]
    fn test_confirm_mode_approve_processes() {
        let dir = project(TWO_BUGS);
        let (mut driver, _handles) = driver(dir.path(), Setup::default(), 50);
        let mut doc = SessionDocument::new("g", SessionMode::Confirm, dir.path());
        let mut gate = ScriptedGate(VecDeque::from([GateDecision::Rejected, GateDecision::Approved]));

        let summary = run(&mut driver, &mut doc, &mut gate);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.verified, 1);
    }

    #[test]
    fn test_scan_only_touches_nothing() {
        let dir = project(TWO_BUGS);
        let (mut driver, handles) = driver(dir.path(), Setup::default(), 50);
        let mut doc = SessionDocument::new("g", SessionMode::ScanOnly, dir.path());
        let summary = run(&mut driver, &mut doc, &mut ScriptedGate(VecDeque::new()));
        assert_eq!(summary.scanned, 3);
        assert_eq!(doc.stats.pending, 2);
        assert!(handles.seen.borrow().is_empty());
        assert_eq!(fs::read_to_string(dir.path().join("app.py")).unwrap(), TWO_BUGS);
    }

    #[test]
    fn test_rescan_is_stable_across_runs() {
        let dir = project(TWO_BUGS);
        let (mut driver, _handles) = driver(dir.path(), Setup::default(), 50);
        let mut doc = SessionDocument::new("g", SessionMode::ScanOnly, dir.path());
        driver.scan(&mut doc, &[Category::Security]).unwrap();
        let ids: Vec<String> = doc.bugs.iter().map(|b| b.id.clone()).collect();
        let again = driver.scan(&mut doc, &[Category::Security]).unwrap();
        assert_eq!(again.known, 3);
        assert_eq!(again.added, 0);
        assert_eq!(doc.bugs.iter().map(|b| b.id.clone()).collect::<Vec<_>>(), ids);
    }

    #[test]
    fn test_without_version_control_run_completes() {
        let dir = project(TWO_BUGS);
        let (mut driver, _handles) = driver(
            dir.path(),
            Setup {
                vcs: None,
                ..Default::default()
            },
            50,
        );
        let mut doc = SessionDocument::new("g", SessionMode::Auto, dir.path());
        let summary = run(&mut driver, &mut doc, &mut ScriptedGate(VecDeque::new()));
        assert_eq!(summary.verified, 2);
        assert!(doc.checkpoints.is_empty());
        assert!(doc.bugs.iter().all(|b| b.checkpoint.is_none()));
    }
}
