use crate::verify::VerificationReport;

/// What the verify-with-retry loop does after one verification.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// The fix passed; the bug is verified.
    Succeed,
    /// Roll back and re-fix with this failure text as feedback.
    Continue(String),
    /// Stop and hand the bug to a human.
    Escalate(String),
}

/// Thresholds gating the fixed → verified / pending / needs_review transitions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Fix drafts allowed per bug, rejected drafts included.
    pub max_attempts: u32,
    pub pass_threshold: f64,
    /// Failures at or below this confidence are not worth another attempt.
    pub retry_floor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            pass_threshold: 0.5,
            retry_floor: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn passes(&self, report: &VerificationReport) -> bool {
        report.syntax_passed() && report.confidence >= self.pass_threshold
    }

    /// Decide the next step given a report and the attempts used so far.
    pub fn decide(&self, report: &VerificationReport, attempts: u32) -> RetryDecision {
        if self.passes(report) {
            return RetryDecision::Succeed;
        }
        if attempts >= self.max_attempts {
            return RetryDecision::Escalate(format!(
                "Retry budget exhausted after {attempts} attempts: {}",
                report.feedback()
            ));
        }
        if !report.retryable || !report.syntax_passed() || report.confidence <= self.retry_floor {
            return RetryDecision::Escalate(format!(
                "Verification failed at confidence {:.2} and is not retryable: {}",
                report.confidence,
                report.feedback()
            ));
        }
        RetryDecision::Continue(report.feedback())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CheckResult, CheckStatus};
    use crate::verify::SYNTAX_STAGE;

    fn report(confidence: f64, syntax: CheckStatus, retryable: bool) -> VerificationReport {
        VerificationReport {
            passed: false,
            confidence,
            checks: vec![CheckResult::new(SYNTAX_STAGE, syntax, "")],
            issues: vec!["Tests failed: 1 failed".to_string()],
            retryable,
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(&report(0.5, CheckStatus::Passed, false), 1),
            RetryDecision::Succeed
        );
    }

    #[test]
    fn test_syntax_failure_never_passes() {
        let policy = RetryPolicy::default();
        let decision = policy.decide(&report(0.9, CheckStatus::Failed, true), 1);
        assert!(matches!(decision, RetryDecision::Escalate(_)));
    }

    #[test]
    fn test_retryable_failure_continues_with_feedback() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(&report(0.4, CheckStatus::Passed, true), 1),
            RetryDecision::Continue("Tests failed: 1 failed".to_string())
        );
    }

    #[test]
    fn test_budget_exhaustion_escalates() {
        let policy = RetryPolicy::default();
        match policy.decide(&report(0.4, CheckStatus::Passed, true), 5) {
            RetryDecision::Escalate(reason) => assert!(reason.contains("exhausted after 5")),
            other => panic!("Expected escalation, got {other:?}"),
        }
    }

    #[test]
    fn test_floor_and_retryable_flag_escalate() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.decide(&report(0.2, CheckStatus::Passed, true), 1),
            RetryDecision::Escalate(_)
        ));
        assert!(matches!(
            policy.decide(&report(0.45, CheckStatus::Passed, false), 1),
            RetryDecision::Escalate(_)
        ));
    }
}
