//! Bug lifecycle state machine.
//!
//! ```text
//! pending ──fix──▶ fixing ──apply──▶ fixed ──verify──▶ verified
//!    ▲               │  ▲                │
//!    │         reject│  │redraft         │ retryable failure
//!    │               └──┘                ▼
//!    └────────────── rollback to "Before fixing {id}" ◀─┘
//!
//! budget exhausted / rollback failed / manual review ──▶ needs_review
//! ```
//!
//! Every mutation is followed by an atomic save of the session document.
//! The "Before fixing" checkpoint is taken only when a new attempt cycle
//! starts; retries inside the cycle reuse it so a rollback always lands on
//! the pristine pre-fix tree. A bug whose earlier fix is still on disk is
//! restored to that checkpoint before it is drafted again, and no draft is
//! requested once the cycle's attempt budget is spent.

pub mod retry;

pub use retry::{RetryDecision, RetryPolicy};

use crate::context::ContextExtractor;
use crate::errors::{RemedyError, Result};
use crate::fixer::{FixProposal, FixRequest, Fixer};
use crate::ignore::IgnoreFilter;
use crate::scanner::CandidateBug;
use crate::session::{BugRecord, BugStatus, FixMetadata, SessionDocument, SessionStore};
use crate::testgen::TestGenerator;
use crate::tracker::CheckpointLedger;
use crate::verify::{PreApply, VerificationReport, Verifier};
use std::fs;
use std::path::{Path, PathBuf};

/// External collaborators the engine drives.
pub struct Collaborators {
    pub fixer: Box<dyn Fixer>,
    pub verifier: Box<dyn Verifier>,
    pub tests: Box<dyn TestGenerator>,
    pub context: ContextExtractor,
}

/// Result of a single fix attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FixOutcome {
    Applied { confidence: f64, diff: String },
    /// The draft failed the pre-apply check; the bug stays `fixing`.
    Rejected { reason: String },
    ManualReview { reason: String },
    /// The attempt budget was already spent; nothing was drafted and the
    /// bug moved to `needs_review`.
    Escalated { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub found: usize,
    pub added: usize,
    pub ignored: usize,
    /// Findings already present in the session.
    pub known: usize,
}

/// Where one bug ended up after [`BugLifecycleEngine::process`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub status: BugStatus,
    /// A fix was written to disk during this call.
    pub fix_applied: bool,
    pub test: Option<PathBuf>,
    /// Escalation reason or test generation failure.
    pub note: Option<String>,
}

fn lookup<'d>(doc: &'d SessionDocument, id: &str) -> Result<&'d BugRecord> {
    doc.bug(id).ok_or_else(|| RemedyError::BugNotFound { id: id.to_string() })
}

fn lookup_mut<'d>(doc: &'d mut SessionDocument, id: &str) -> Result<&'d mut BugRecord> {
    doc.bug_mut(id)
        .ok_or_else(|| RemedyError::BugNotFound { id: id.to_string() })
}

pub struct BugLifecycleEngine {
    root: PathBuf,
    store: SessionStore,
    ledger: CheckpointLedger,
    filter: IgnoreFilter,
    collab: Collaborators,
    policy: RetryPolicy,
    steps: u32,
}

impl BugLifecycleEngine {
    pub fn new(
        root: impl Into<PathBuf>,
        store: SessionStore,
        ledger: CheckpointLedger,
        filter: IgnoreFilter,
        collab: Collaborators,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            root: root.into(),
            store,
            ledger,
            filter,
            collab,
            policy,
            steps: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Scan, fix, verify and test-generation calls made so far.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn count_step(&mut self, operation: &'static str) {
        self.steps += 1;
        tracing::trace!(operation, step = self.steps, "step");
    }

    pub fn save(&self, doc: &mut SessionDocument) -> Result<()> {
        doc.refresh_stats();
        self.store.save(doc)
    }

    /// Create a named checkpoint and persist the updated log.
    pub fn checkpoint(&self, doc: &mut SessionDocument, message: &str) -> Result<Option<String>> {
        let sha = self.ledger.checkpoint(doc, message)?;
        if sha.is_some() {
            self.save(doc)?;
        }
        Ok(sha)
    }

    /// Merge scan results into the session by id.
    ///
    /// New findings enter at `pending`, or at `ignored` when a rule matches.
    /// Known findings keep their status, except that `pending` ones are
    /// re-evaluated against the current rules.
    pub fn ingest(
        &mut self,
        doc: &mut SessionDocument,
        candidates: Vec<CandidateBug>,
    ) -> Result<IngestSummary> {
        let mut summary = IngestSummary {
            found: candidates.len(),
            ..Default::default()
        };

        for candidate in candidates {
            let id = candidate.id();
            if let Some(existing) = doc.bug_mut(&id) {
                summary.known += 1;
                if existing.status == BugStatus::Pending
                    && let Some(rule) = self.filter.matches(existing)
                {
                    tracing::info!(bug_id = %id, rule, "pending bug now suppressed");
                    existing.ignore_rule = Some(rule.to_string());
                    existing.status = BugStatus::Ignored;
                    summary.ignored += 1;
                }
                continue;
            }

            let mut bug = candidate.into_record();
            if let Some(rule) = self.filter.matches(&bug) {
                tracing::debug!(bug_id = %bug.id, rule, "suppressed by ignore rule");
                bug.ignore_rule = Some(rule.to_string());
                bug.status = BugStatus::Ignored;
                summary.ignored += 1;
            } else {
                summary.added += 1;
            }
            doc.bugs.push(bug);
        }

        self.save(doc)?;
        tracing::info!(
            found = summary.found,
            added = summary.added,
            ignored = summary.ignored,
            known = summary.known,
            "scan ingested"
        );
        Ok(summary)
    }

    /// Draft and apply one fix for `id`.
    ///
    /// Only `pending`, `fixing` and `needs_review` bugs accept a fix. Entering
    /// from `fixing` continues the interrupted cycle and its checkpoint; a
    /// bug with an applied fix is first restored to its pre-fix checkpoint.
    pub fn fix(&mut self, doc: &mut SessionDocument, id: &str) -> Result<FixOutcome> {
        let status = lookup(doc, id)?.status;
        if !status.accepts_fix() {
            return Err(RemedyError::InvalidStatus {
                id: id.to_string(),
                status,
                operation: "fix",
                expected: "pending, fixing or needs_review",
            });
        }
        let new_cycle = self.prepare_cycle(doc, id)?;
        self.attempt_fix(doc, id, None, new_cycle)
    }

    /// Decide whether the next draft for `id` opens a new attempt cycle.
    ///
    /// When an earlier fix is still on disk the tree is reset to the bug's
    /// recorded checkpoint, which stays the cycle's checkpoint. From
    /// `needs_review` that is an operator retry and the budget starts over;
    /// from `pending` it is an interrupted retry and the attempts carry on.
    fn prepare_cycle(&mut self, doc: &mut SessionDocument, id: &str) -> Result<bool> {
        let bug = lookup(doc, id)?;
        let status = bug.status;
        if status == BugStatus::Fixing {
            return Ok(false);
        }
        if !bug.has_applied_fix() {
            return Ok(true);
        }
        let sha = bug
            .checkpoint
            .clone()
            .ok_or_else(|| RemedyError::NoCheckpoint { id: id.to_string() })?;
        self.ledger.rollback(&sha)?;

        let bug = lookup_mut(doc, id)?;
        bug.fixed_checkpoint = None;
        bug.verification = None;
        if status == BugStatus::NeedsReview {
            bug.fix = None;
            bug.escalation = None;
        } else if let Some(fix) = bug.fix.as_mut() {
            fix.diff = None;
        }
        bug.status = BugStatus::Pending;
        self.save(doc)?;
        tracing::info!(bug_id = %id, from = %status, "restored pre-fix checkpoint before redrafting");
        Ok(false)
    }

    fn attempt_fix(
        &mut self,
        doc: &mut SessionDocument,
        id: &str,
        feedback: Option<&str>,
        new_cycle: bool,
    ) -> Result<FixOutcome> {
        if !new_cycle {
            let attempts = lookup(doc, id)?.attempts();
            if attempts >= self.policy.max_attempts {
                let reason = format!("Retry budget exhausted after {attempts} attempts");
                self.escalate(doc, id, reason.clone())?;
                return Ok(FixOutcome::Escalated { reason });
            }
        }
        self.count_step("fix");

        if new_cycle {
            let sha = self.ledger.checkpoint(doc, &format!("Before fixing {id}"))?;
            let bug = lookup_mut(doc, id)?;
            bug.checkpoint = sha;
            bug.fixed_checkpoint = None;
            bug.fix = None;
            bug.verification = None;
            bug.escalation = None;
        }
        let bug = lookup_mut(doc, id)?;
        bug.status = BugStatus::Fixing;
        bug.last_error = None;
        self.save(doc)?;
        tracing::info!(bug_id = %id, new_cycle, feedback = feedback.is_some(), "fixing");

        let context = match self.collab.context.extract(&self.root, lookup(doc, id)?) {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                tracing::debug!(bug_id = %id, error = %e, "no minimal context");
                None
            }
        };
        if let Some(ctx) = &context {
            doc.context.files_extracted += 1;
            doc.context.tokens_saved += ctx.tokens_saved() as u64;
        }

        let proposal = self.collab.fixer.generate_fix(&FixRequest {
            project_root: &self.root,
            bug: lookup(doc, id)?,
            context: context.as_ref(),
            feedback,
        });
        let proposal = match proposal {
            Ok(p) => p,
            Err(e) => return Err(self.fail(doc, id, "fix", format!("{e:#}"))),
        };

        match proposal {
            FixProposal::ManualReview { prompt, reason } => {
                let bug = lookup_mut(doc, id)?;
                bug.fix.get_or_insert_with(FixMetadata::default).manual_prompt = Some(prompt);
                bug.status = BugStatus::NeedsReview;
                bug.escalation = Some(reason.clone());
                self.save(doc)?;
                tracing::warn!(bug_id = %id, reason = %reason, "needs manual review");
                Ok(FixOutcome::ManualReview { reason })
            }
            FixProposal::Draft {
                new_content,
                confidence,
                diff,
                reasoning,
            } => {
                let (path, language) = {
                    let bug = lookup(doc, id)?;
                    (self.root.join(&bug.location.file), bug.language.clone())
                };
                let verdict = self
                    .collab
                    .verifier
                    .check_before_apply(&new_content, &path, &language);

                let fix = lookup_mut(doc, id)?
                    .fix
                    .get_or_insert_with(FixMetadata::default);
                fix.attempts += 1;
                let attempt = fix.attempts;

                if let PreApply::Invalid(reason) = verdict {
                    fix.rejected = Some(reason.clone());
                    self.save(doc)?;
                    tracing::warn!(bug_id = %id, attempt, reason = %reason, "draft rejected before apply");
                    return Ok(FixOutcome::Rejected { reason });
                }
                fix.diff = Some(diff.clone());
                fix.confidence = confidence;
                fix.rejected = None;
                fix.manual_prompt = None;

                if let Err(source) = fs::write(&path, &new_content) {
                    self.save(doc)?;
                    return Err(RemedyError::Store {
                        action: "write",
                        path,
                        source,
                    });
                }

                let sha = self.ledger.checkpoint(doc, &format!("Fixed {id}"));
                let bug = lookup_mut(doc, id)?;
                bug.status = BugStatus::Fixed;
                match sha {
                    Ok(sha) => bug.fixed_checkpoint = sha,
                    Err(e) => {
                        bug.last_error = Some(e.to_string());
                        self.save(doc)?;
                        return Err(e);
                    }
                }
                self.save(doc)?;
                tracing::info!(bug_id = %id, attempt, confidence, reasoning = %reasoning, "fix applied");
                Ok(FixOutcome::Applied { confidence, diff })
            }
        }
    }

    /// Fix, redrafting rejected drafts until one applies or the budget runs out.
    fn fix_until_applied(
        &mut self,
        doc: &mut SessionDocument,
        id: &str,
        feedback: Option<String>,
        new_cycle: bool,
    ) -> Result<FixOutcome> {
        let mut feedback = feedback;
        let mut new_cycle = new_cycle;
        loop {
            let outcome = self.attempt_fix(doc, id, feedback.as_deref(), new_cycle)?;
            new_cycle = false;
            let FixOutcome::Rejected { reason } = outcome else {
                return Ok(outcome);
            };

            let attempts = lookup(doc, id)?.attempts();
            if attempts >= self.policy.max_attempts {
                self.escalate(
                    doc,
                    id,
                    format!("Retry budget exhausted after {attempts} attempts; last draft rejected: {reason}"),
                )?;
                return Ok(FixOutcome::Rejected { reason });
            }
            feedback = Some(format!("Previous draft was rejected before apply: {reason}"));
        }
    }

    /// Run the verifier once. A pass moves the bug to `verified`; a failure
    /// leaves it `fixed` with the report recorded.
    pub fn verify(&mut self, doc: &mut SessionDocument, id: &str) -> Result<VerificationReport> {
        let status = lookup(doc, id)?.status;
        if status != BugStatus::Fixed {
            return Err(RemedyError::InvalidStatus {
                id: id.to_string(),
                status,
                operation: "verify",
                expected: "fixed",
            });
        }
        self.count_step("verify");

        let mut report = match self.collab.verifier.verify(&self.root, lookup(doc, id)?) {
            Ok(r) => r,
            Err(e) => return Err(self.fail(doc, id, "verify", format!("{e:#}"))),
        };
        report.passed = self.policy.passes(&report);

        let bug = lookup_mut(doc, id)?;
        bug.verification = Some(report.to_metadata());
        if report.passed {
            bug.status = BugStatus::Verified;
        }
        self.save(doc)?;
        tracing::info!(
            bug_id = %id,
            attempt = lookup(doc, id)?.attempts(),
            confidence = report.confidence,
            passed = report.passed,
            retryable = report.retryable,
            "verification finished"
        );
        Ok(report)
    }

    /// Verify, rolling back and re-fixing with feedback while the policy allows.
    pub fn verify_with_retry(&mut self, doc: &mut SessionDocument, id: &str) -> Result<BugStatus> {
        loop {
            let report = self.verify(doc, id)?;
            let attempts = lookup(doc, id)?.attempts();
            let feedback = match self.policy.decide(&report, attempts) {
                RetryDecision::Succeed => return Ok(BugStatus::Verified),
                RetryDecision::Escalate(reason) => {
                    self.escalate(doc, id, reason)?;
                    return Ok(BugStatus::NeedsReview);
                }
                RetryDecision::Continue(feedback) => feedback,
            };

            tracing::info!(bug_id = %id, attempt = attempts, confidence = report.confidence, "retrying fix");
            if !self.rollback_for_retry(doc, id)? {
                return Ok(BugStatus::NeedsReview);
            }
            match self.fix_until_applied(doc, id, Some(feedback), false)? {
                FixOutcome::Applied { .. } => continue,
                FixOutcome::Rejected { .. }
                | FixOutcome::ManualReview { .. }
                | FixOutcome::Escalated { .. } => {
                    return Ok(lookup(doc, id)?.status);
                }
            }
        }
    }

    /// Returns `false` after escalating when the tree cannot be restored.
    fn rollback_for_retry(&mut self, doc: &mut SessionDocument, id: &str) -> Result<bool> {
        let Some(sha) = lookup(doc, id)?.checkpoint.clone() else {
            self.escalate(doc, id, "No checkpoint to roll back to before retrying")?;
            return Ok(false);
        };
        if let Err(e) = self.ledger.rollback(&sha) {
            self.escalate(doc, id, format!("Rollback before retry failed: {e}"))?;
            return Ok(false);
        }

        let bug = lookup_mut(doc, id)?;
        bug.status = BugStatus::Pending;
        bug.fixed_checkpoint = None;
        self.save(doc)?;
        Ok(true)
    }

    /// Drive one queued bug as far as it will go.
    ///
    /// `pending` and `fixing` bugs are fixed and verified; `fixed` bugs (an
    /// interrupted run) go straight to verification. Verified bugs get a
    /// regression test, whose failure is noted but never reverts the status.
    pub fn process(&mut self, doc: &mut SessionDocument, id: &str) -> Result<ProcessOutcome> {
        let status = lookup(doc, id)?.status;
        let mut fix_applied = false;
        let status = match status {
            BugStatus::Fixed => self.verify_with_retry(doc, id)?,
            BugStatus::Pending | BugStatus::Fixing => {
                let new_cycle = self.prepare_cycle(doc, id)?;
                match self.fix_until_applied(doc, id, None, new_cycle)? {
                    FixOutcome::Applied { .. } => {
                        fix_applied = true;
                        self.verify_with_retry(doc, id)?
                    }
                    _ => lookup(doc, id)?.status,
                }
            }
            other => {
                return Err(RemedyError::InvalidStatus {
                    id: id.to_string(),
                    status: other,
                    operation: "process",
                    expected: "pending, fixing or fixed",
                });
            }
        };

        let mut test = None;
        let mut note = None;
        if status == BugStatus::Verified {
            match self.generate_test(doc, id) {
                Ok(path) => test = Some(path),
                Err(e) => {
                    tracing::warn!(bug_id = %id, error = %e, "test generation failed");
                    note = Some(e.to_string());
                }
            }
        } else {
            note = lookup(doc, id)?.escalation.clone();
        }

        Ok(ProcessOutcome {
            status,
            fix_applied,
            test,
            note,
        })
    }

    /// Write a regression test for a verified bug. Status is never changed.
    pub fn generate_test(&mut self, doc: &mut SessionDocument, id: &str) -> Result<PathBuf> {
        let status = lookup(doc, id)?.status;
        if status != BugStatus::Verified {
            return Err(RemedyError::InvalidStatus {
                id: id.to_string(),
                status,
                operation: "test",
                expected: "verified",
            });
        }
        self.count_step("testgen");

        let generated = {
            let bug = lookup(doc, id)?;
            let diff = bug.fix.as_ref().and_then(|f| f.diff.as_deref());
            self.collab.tests.generate(&self.root, bug, diff)
        };
        let generated = match generated {
            Ok(g) => g,
            Err(e) => return Err(self.fail(doc, id, "test generation", format!("{e:#}"))),
        };

        lookup_mut(doc, id)?.test_generated = Some(generated.path.clone());
        self.save(doc)?;
        tracing::info!(bug_id = %id, path = %generated.path.display(), "regression test written");
        Ok(generated.path)
    }

    /// Operator rollback: restore the bug's pre-fix checkpoint and return it
    /// to `pending` with fix, verification and test metadata cleared.
    ///
    /// Fails without touching the record when there is no checkpoint or the
    /// reset fails.
    pub fn rollback(&mut self, doc: &mut SessionDocument, id: &str) -> Result<String> {
        let sha = lookup(doc, id)?
            .checkpoint
            .clone()
            .ok_or_else(|| RemedyError::NoCheckpoint { id: id.to_string() })?;
        self.ledger.rollback(&sha)?;

        let bug = lookup_mut(doc, id)?;
        let previous = bug.status;
        bug.status = BugStatus::Pending;
        bug.fix = None;
        bug.verification = None;
        bug.test_generated = None;
        bug.fixed_checkpoint = None;
        bug.escalation = None;
        bug.last_error = None;
        self.save(doc)?;
        tracing::info!(bug_id = %id, from = %previous, "rolled back to pending");
        Ok(sha)
    }

    fn escalate(&self, doc: &mut SessionDocument, id: &str, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        let bug = lookup_mut(doc, id)?;
        bug.status = BugStatus::NeedsReview;
        bug.escalation = Some(reason.clone());
        self.save(doc)?;
        tracing::warn!(bug_id = %id, reason = %reason, "escalated to needs_review");
        Ok(())
    }

    /// Record `message` on the bug without changing its status.
    pub fn record_error(&self, doc: &mut SessionDocument, id: &str, message: &str) -> Result<()> {
        lookup_mut(doc, id)?.last_error = Some(message.to_string());
        self.save(doc)
    }

    /// Record a collaborator failure and build the error for the caller.
    fn fail(
        &self,
        doc: &mut SessionDocument,
        id: &str,
        operation: &'static str,
        message: String,
    ) -> RemedyError {
        if let Err(e) = self.record_error(doc, id, &message) {
            tracing::error!(bug_id = %id, error = %e, "failed to record error");
        }
        RemedyError::Collaborator {
            operation,
            subject: id.to_string(),
            message,
        }
    }
}
