//! Fix verification: a fast pre-apply gate and the staged post-apply check.

pub mod process;
pub mod stages;

pub use process::{SystemRunner, ToolInvocation, ToolOutcome, ToolRunner};
pub use stages::StagedVerifier;

use crate::session::{BugRecord, CheckResult, CheckStatus, VerificationMetadata};
use anyhow::Result;
use std::path::Path;
use std::time::Duration;

/// Confidence deducted per failed stage.
pub const IMPORT_PENALTY: f64 = 0.2;
pub const LINT_PENALTY: f64 = 0.15;
pub const TEST_PENALTY: f64 = 0.3;

/// Name of the mandatory stage; its failure ends verification.
pub const SYNTAX_STAGE: &str = "syntax";

#[derive(Debug, Clone, PartialEq)]
pub struct VerifySettings {
    pub pass_threshold: f64,
    pub retry_floor: f64,
    pub syntax_timeout: Duration,
    pub import_timeout: Duration,
    pub lint_timeout: Duration,
    pub test_timeout: Duration,
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self {
            pass_threshold: 0.5,
            retry_floor: 0.2,
            syntax_timeout: Duration::from_secs(15),
            import_timeout: Duration::from_secs(15),
            lint_timeout: Duration::from_secs(30),
            test_timeout: Duration::from_secs(60),
        }
    }
}

/// Result of the pre-apply structural gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreApply {
    Valid,
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationReport {
    pub passed: bool,
    pub confidence: f64,
    pub checks: Vec<CheckResult>,
    pub issues: Vec<String>,
    /// Another fix attempt could plausibly pass.
    pub retryable: bool,
}

impl VerificationReport {
    pub fn syntax_passed(&self) -> bool {
        !self
            .checks
            .iter()
            .any(|c| c.name == SYNTAX_STAGE && c.status == CheckStatus::Failed)
    }

    /// Failure text handed to the next fix attempt.
    pub fn feedback(&self) -> String {
        if self.issues.is_empty() {
            format!("Verification failed (confidence {:.2})", self.confidence)
        } else {
            self.issues.join("; ")
        }
    }

    pub fn to_metadata(&self) -> VerificationMetadata {
        VerificationMetadata {
            passed: self.passed,
            confidence: self.confidence,
            checks: self.checks.clone(),
            issues: self.issues.clone(),
        }
    }
}

pub trait Verifier {
    /// Fast structural check on proposed content before anything is written.
    fn check_before_apply(&self, content: &str, file: &Path, language: &str) -> PreApply;

    /// Run the verification stages against the bug's file as it is on disk.
    fn verify(&self, project_root: &Path, bug: &BugRecord) -> Result<VerificationReport>;
}

/// Bracket balance check that skips string literals and comments.
///
/// Used when no real parser is available.
pub fn check_balance(content: &str, language: &str) -> std::result::Result<(), String> {
    let python = language == "python";
    let chars: Vec<char> = content.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => line += 1,
            '#' if python => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if !python && chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if !python && chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    if chars[i] == '\n' {
                        line += 1;
                    }
                    i += 1;
                }
                i += 2;
                continue;
            }
            '"' | '\'' | '`' if c != '`' || !python => {
                let triple = python && chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
                i += if triple { 3 } else { 1 };
                while i < chars.len() {
                    let ch = chars[i];
                    if ch == '\\' {
                        i += 2;
                        continue;
                    }
                    if ch == '\n' {
                        line += 1;
                        // only triple-quoted and template strings span lines
                        if !triple && c != '`' {
                            break;
                        }
                    }
                    if ch == c
                        && (!triple || (chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c)))
                    {
                        i += if triple { 2 } else { 0 };
                        break;
                    }
                    i += 1;
                }
            }
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, open_line)) => {
                        return Err(format!(
                            "Line {line}: '{c}' does not match '{open}' opened on line {open_line}"
                        ));
                    }
                    None => return Err(format!("Line {line}: unmatched '{c}'")),
                }
            }
            _ => {}
        }
        i += 1;
    }

    match stack.pop() {
        Some((open, open_line)) => Err(format!("Line {open_line}: unclosed '{open}'")),
        None => Ok(()),
    }
}

/// First non-empty line of tool output, trimmed to a readable length.
pub(crate) fn first_line(output: &str) -> String {
    let line = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no output");
    line.chars().take(200).collect()
}

/// Last non-empty line of tool output (test runners put the summary there).
pub(crate) fn last_line(output: &str) -> String {
    let line = output
        .lines()
        .map(str::trim)
        .rev()
        .find(|l| !l.is_empty())
        .unwrap_or("no output");
    line.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_accepts_valid_code() {
        assert!(check_balance("def f(x):\n    return [x, {'a': (1)}]\n", "python").is_ok());
        assert!(check_balance("function f() { return `${a}`; }\n", "javascript").is_ok());
    }

    #[test]
    fn test_balance_ignores_strings_and_comments() {
        assert!(check_balance("s = ')'  # (\nt = \"]\"\n", "python").is_ok());
        assert!(check_balance("const s = '}'; // {\n/* ( */\n", "javascript").is_ok());
        assert!(check_balance("doc = \"\"\"\n(\n\"\"\"\n", "python").is_ok());
    }

    #[test]
    fn test_balance_reports_mismatch() {
        let err = check_balance("if (a) {\n  b();\n", "javascript").unwrap_err();
        assert!(err.contains("unclosed '{'"), "{err}");
        let err = check_balance("x = (1, 2]\n", "python").unwrap_err();
        assert!(err.contains("does not match"), "{err}");
        let err = check_balance("x = 1)\n", "python").unwrap_err();
        assert!(err.starts_with("Line 1"), "{err}");
    }

    #[test]
    fn test_report_feedback_and_syntax() {
        let report = VerificationReport {
            passed: false,
            confidence: 0.35,
            checks: vec![
                CheckResult::new(SYNTAX_STAGE, CheckStatus::Passed, "ok"),
                CheckResult::new("lint", CheckStatus::Failed, "E501"),
            ],
            issues: vec!["Lint: E501".to_string(), "Tests failed: 1 failed".to_string()],
            retryable: true,
        };
        assert!(report.syntax_passed());
        assert_eq!(report.feedback(), "Lint: E501; Tests failed: 1 failed");

        let broken = VerificationReport {
            checks: vec![CheckResult::new(SYNTAX_STAGE, CheckStatus::Failed, "bad")],
            issues: vec![],
            ..report
        };
        assert!(!broken.syntax_passed());
        assert!(broken.feedback().contains("0.35"));
    }

    #[test]
    fn test_output_lines() {
        assert_eq!(first_line("\n  first \nsecond\n"), "first");
        assert_eq!(last_line("a\n1 failed in 0.2s\n\n"), "1 failed in 0.2s");
        assert_eq!(first_line(""), "no output");
    }
}
