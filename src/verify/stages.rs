use super::{
    IMPORT_PENALTY, LINT_PENALTY, PreApply, SYNTAX_STAGE, SystemRunner, TEST_PENALTY, ToolInvocation,
    ToolOutcome, ToolRunner, VerificationReport, Verifier, VerifySettings, check_balance, first_line,
    last_line,
};
use crate::session::{BugRecord, CheckResult, CheckStatus};
use anyhow::Result;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

const PYTHON: &str = "python3";

/// Parses stdin with `ast`; prints `Line N: msg` on a syntax error.
const PY_SYNTAX_SCRIPT: &str = "import ast, sys\n\
try:\n    ast.parse(sys.stdin.read())\n\
except SyntaxError as e:\n    print(f'Line {e.lineno}: {e.msg}')\n    sys.exit(1)\n";

/// argv[1] is the project root, the rest are top-level module names.
const PY_IMPORT_SCRIPT: &str = "import importlib.util, sys\n\
sys.path[:0] = [sys.argv[1]]\n\
missing = [m for m in sys.argv[2:] if importlib.util.find_spec(m) is None]\n\
print(', '.join(missing))\n\
sys.exit(1 if missing else 0)\n";

static PY_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*import\s+([\w\.]+(?:\s*,\s*[\w\.]+)*)").unwrap());
static PY_FROM_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*from\s+([\w\.]+)\s+import\b").unwrap());

/// Syntax, imports, lint, tests; each stage an external tool under a timeout.
///
/// Confidence starts at 1.0 and each failed stage deducts its penalty. A
/// stage whose tool is unavailable is recorded as skipped and costs nothing.
pub struct StagedVerifier<R: ToolRunner = SystemRunner> {
    runner: R,
    settings: VerifySettings,
}

impl StagedVerifier<SystemRunner> {
    pub fn new(settings: VerifySettings) -> Self {
        Self::with_runner(SystemRunner, settings)
    }
}

impl<R: ToolRunner> StagedVerifier<R> {
    pub fn with_runner(runner: R, settings: VerifySettings) -> Self {
        Self { runner, settings }
    }

    fn python_syntax(&self, content: &str, cwd: &Path) -> std::result::Result<(), String> {
        let inv = ToolInvocation::new(SYNTAX_STAGE, PYTHON, cwd, self.settings.syntax_timeout)
            .arg("-c")
            .arg(PY_SYNTAX_SCRIPT)
            .stdin(content);
        match self.runner.run(&inv) {
            ToolOutcome::Completed { success: true, .. } => Ok(()),
            ToolOutcome::Completed { output, .. } => Err(first_line(&output)),
            ToolOutcome::TimedOut => Err(timeout_message(self.settings.syntax_timeout)),
            ToolOutcome::NotFound | ToolOutcome::Failed(_) => check_balance(content, "python"),
        }
    }

    fn check_syntax(&self, root: &Path, path: &Path, content: &str, language: &str) -> CheckResult {
        let started = Instant::now();
        let result = match language {
            "python" => self.python_syntax(content, root).map(|_| "Valid Python syntax".to_string()),
            "javascript" => self.js_syntax(root, path, content),
            other => check_balance(content, other).map(|_| "Basic check passed".to_string()),
        };
        let check = match result {
            Ok(msg) => CheckResult::new(SYNTAX_STAGE, CheckStatus::Passed, msg),
            Err(msg) => CheckResult::new(SYNTAX_STAGE, CheckStatus::Failed, msg),
        };
        check.with_duration(started.elapsed())
    }

    fn js_syntax(&self, root: &Path, path: &Path, content: &str) -> std::result::Result<String, String> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let timeout = self.settings.syntax_timeout;
        let file = path.display().to_string();

        let inv = match ext {
            "js" | "mjs" | "cjs" => Some(
                ToolInvocation::new(SYNTAX_STAGE, "node", root, timeout).args(["--check", file.as_str()]),
            ),
            "ts" | "tsx" => local_bin(root, "tsc").map(|tsc| {
                ToolInvocation::new(SYNTAX_STAGE, tsc, root, timeout).args([
                    "--noEmit",
                    "--allowJs",
                    "--skipLibCheck",
                    file.as_str(),
                ])
            }),
            _ => None,
        };

        match inv.map(|inv| self.runner.run(&inv)) {
            Some(ToolOutcome::Completed { success: true, .. }) => Ok("Valid JavaScript".to_string()),
            Some(ToolOutcome::Completed { output, .. }) => Err(first_line(&output)),
            Some(ToolOutcome::TimedOut) => Err(timeout_message(timeout)),
            _ => check_balance(content, "javascript").map(|_| "Basic check passed".to_string()),
        }
    }

    fn check_imports(&self, root: &Path, content: &str, language: &str) -> CheckResult {
        let started = Instant::now();
        if language != "python" {
            return CheckResult::new("imports", CheckStatus::Skipped, "Not supported for this language");
        }

        let modules = python_modules(content);
        if modules.is_empty() {
            return CheckResult::new("imports", CheckStatus::Passed, "No imports");
        }

        let inv = ToolInvocation::new("imports", PYTHON, root, self.settings.import_timeout)
            .arg("-c")
            .arg(PY_IMPORT_SCRIPT)
            .arg(root.display().to_string())
            .args(modules.iter().cloned());
        let check = match self.runner.run(&inv) {
            ToolOutcome::Completed { success: true, .. } => {
                CheckResult::new("imports", CheckStatus::Passed, "All imports available")
            }
            ToolOutcome::Completed { output, .. } => CheckResult::new(
                "imports",
                CheckStatus::Failed,
                format!("Missing: {}", first_line(&output)),
            ),
            ToolOutcome::TimedOut => CheckResult::new(
                "imports",
                CheckStatus::Failed,
                timeout_message(self.settings.import_timeout),
            ),
            ToolOutcome::NotFound | ToolOutcome::Failed(_) => {
                CheckResult::new("imports", CheckStatus::Skipped, "Python interpreter not available")
            }
        };
        check.with_duration(started.elapsed())
    }

    fn check_lint(&self, root: &Path, path: &Path, language: &str) -> CheckResult {
        let started = Instant::now();
        let file = path.display().to_string();
        let timeout = self.settings.lint_timeout;

        let candidates: Vec<ToolInvocation> = match language {
            "python" => vec![
                ToolInvocation::new("lint", "ruff", root, timeout).args(["check", "--select=E,F", file.as_str()]),
                ToolInvocation::new("lint", "flake8", root, timeout).args(["--select=E,F", file.as_str()]),
                ToolInvocation::new("lint", "pylint", root, timeout).args(["--errors-only", file.as_str()]),
            ],
            "javascript" => [
                local_bin(root, "eslint")
                    .map(|bin| ToolInvocation::new("lint", bin, root, timeout).args(["--quiet", file.as_str()])),
                local_bin(root, "biome")
                    .map(|bin| ToolInvocation::new("lint", bin, root, timeout).args(["check", file.as_str()])),
            ]
            .into_iter()
            .flatten()
            .collect(),
            _ => Vec::new(),
        };

        for inv in &candidates {
            let linter = inv.program_name();
            let check = match self.runner.run(inv) {
                ToolOutcome::Completed { success: true, .. } => {
                    CheckResult::new("lint", CheckStatus::Passed, format!("No issues ({linter})"))
                }
                ToolOutcome::Completed { output, .. } => CheckResult::new(
                    "lint",
                    CheckStatus::Failed,
                    format!("{linter}: {}", first_line(&output)),
                ),
                ToolOutcome::TimedOut => CheckResult::new(
                    "lint",
                    CheckStatus::Failed,
                    format!("{linter}: {}", timeout_message(timeout)),
                ),
                ToolOutcome::NotFound | ToolOutcome::Failed(_) => continue,
            };
            return check.with_duration(started.elapsed());
        }

        CheckResult::new("lint", CheckStatus::Skipped, "No linter available").with_duration(started.elapsed())
    }

    fn check_tests(&self, root: &Path, path: &Path, language: &str) -> CheckResult {
        let started = Instant::now();
        let Some(test_file) = find_test_file(root, path) else {
            return CheckResult::new("tests", CheckStatus::Skipped, "No test file found");
        };
        let file = test_file.display().to_string();
        let timeout = self.settings.test_timeout;

        let inv = match language {
            "python" => Some(
                ToolInvocation::new("tests", PYTHON, root, timeout).args(["-m", "pytest", file.as_str(), "-q", "--tb=short"]),
            ),
            "javascript" => local_bin(root, "jest")
                .map(|bin| ToolInvocation::new("tests", bin, root, timeout).args([file.as_str(), "--silent"])),
            _ => None,
        };
        let Some(inv) = inv else {
            return CheckResult::new("tests", CheckStatus::Skipped, "No test runner");
        };

        let check = match self.runner.run(&inv) {
            ToolOutcome::Completed { success: true, .. } => {
                CheckResult::new("tests", CheckStatus::Passed, "All tests passed")
            }
            ToolOutcome::Completed { output, .. } if output.contains("No module named pytest") => {
                CheckResult::new("tests", CheckStatus::Skipped, "pytest not installed")
            }
            ToolOutcome::Completed { output, .. } => {
                CheckResult::new("tests", CheckStatus::Failed, last_line(&output))
            }
            ToolOutcome::TimedOut => CheckResult::new("tests", CheckStatus::Failed, timeout_message(timeout)),
            ToolOutcome::NotFound | ToolOutcome::Failed(_) => {
                CheckResult::new("tests", CheckStatus::Skipped, "Test runner not found")
            }
        };
        check.with_duration(started.elapsed())
    }

    fn report(&self, checks: Vec<CheckResult>, issues: Vec<String>, confidence: f64) -> VerificationReport {
        let confidence = ((confidence * 100.0).round() / 100.0).max(0.0);
        let passed = confidence >= self.settings.pass_threshold;
        VerificationReport {
            passed,
            confidence,
            checks,
            issues,
            retryable: !passed && confidence > self.settings.retry_floor,
        }
    }
}

impl<R: ToolRunner> Verifier for StagedVerifier<R> {
    fn check_before_apply(&self, content: &str, file: &Path, language: &str) -> PreApply {
        let cwd = file.parent().unwrap_or_else(|| Path::new("."));
        let result = match language {
            "python" => self.python_syntax(content, cwd),
            other => check_balance(content, other),
        };
        match result {
            Ok(()) => PreApply::Valid,
            Err(reason) => PreApply::Invalid(reason),
        }
    }

    fn verify(&self, project_root: &Path, bug: &BugRecord) -> Result<VerificationReport> {
        let path = project_root.join(&bug.location.file);
        let content = match fs::read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                return Ok(VerificationReport {
                    passed: false,
                    confidence: 0.0,
                    checks: Vec::new(),
                    issues: vec![format!("Cannot read {}: {e}", path.display())],
                    retryable: false,
                });
            }
        };
        let language = bug.language.as_str();

        let syntax = self.check_syntax(project_root, &path, &content, language);
        if syntax.status == CheckStatus::Failed {
            let issue = format!("Syntax error: {}", syntax.message);
            tracing::debug!(bug_id = %bug.id, %issue, "syntax stage failed");
            return Ok(VerificationReport {
                passed: false,
                confidence: 0.0,
                checks: vec![syntax],
                issues: vec![issue],
                retryable: false,
            });
        }

        let mut confidence = 1.0;
        let mut issues = Vec::new();
        let mut checks = vec![syntax];

        let imports = self.check_imports(project_root, &content, language);
        if imports.status == CheckStatus::Failed {
            issues.push(format!("Import issue: {}", imports.message));
            confidence -= IMPORT_PENALTY;
        }
        checks.push(imports);

        let lint = self.check_lint(project_root, &path, language);
        if lint.status == CheckStatus::Failed {
            issues.push(format!("Lint: {}", lint.message));
            confidence -= LINT_PENALTY;
        }
        checks.push(lint);

        let tests = self.check_tests(project_root, &path, language);
        if tests.status == CheckStatus::Failed {
            issues.push(format!("Tests failed: {}", tests.message));
            confidence -= TEST_PENALTY;
        }
        checks.push(tests);

        let report = self.report(checks, issues, confidence);
        tracing::debug!(
            bug_id = %bug.id,
            confidence = report.confidence,
            passed = report.passed,
            "verification finished"
        );
        Ok(report)
    }
}

fn timeout_message(timeout: Duration) -> String {
    format!("timed out after {}s", timeout.as_secs())
}

/// A project-local node tool, if installed.
fn local_bin(root: &Path, name: &str) -> Option<PathBuf> {
    let bin = root.join("node_modules").join(".bin").join(name);
    bin.exists().then_some(bin)
}

/// Top-level, non-relative module names imported by `content`.
fn python_modules(content: &str) -> BTreeSet<String> {
    let mut modules = BTreeSet::new();
    for caps in PY_IMPORT.captures_iter(content) {
        for name in caps[1].split(',') {
            if let Some(top) = name.trim().split('.').next().filter(|t| !t.is_empty()) {
                modules.insert(top.to_string());
            }
        }
    }
    for caps in PY_FROM_IMPORT.captures_iter(content) {
        let name = &caps[1];
        if name.starts_with('.') {
            continue;
        }
        if let Some(top) = name.split('.').next().filter(|t| !t.is_empty()) {
            modules.insert(top.to_string());
        }
    }
    modules
}

/// Conventional test file locations for `path`, first hit wins.
fn find_test_file(root: &Path, path: &Path) -> Option<PathBuf> {
    let stem = path.file_stem()?.to_string_lossy().into_owned();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let dir = path.parent()?;
    [
        dir.join(format!("test_{stem}{ext}")),
        dir.join(format!("{stem}_test{ext}")),
        dir.join(format!("{stem}.test{ext}")),
        dir.join(format!("{stem}.spec{ext}")),
        dir.join("tests").join(format!("test_{stem}{ext}")),
        dir.join("__tests__").join(format!("{stem}.test{ext}")),
        root.join("tests").join(format!("test_{stem}{ext}")),
    ]
    .into_iter()
    .find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Severity;
    use crate::session::tests::sample_bug;
    use std::cell::RefCell;
    use tempfile::tempdir;

    /// Answers by stage; records every invocation.
    struct FakeRunner {
        answer: Box<dyn Fn(&ToolInvocation) -> ToolOutcome>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeRunner {
        fn new(answer: impl Fn(&ToolInvocation) -> ToolOutcome + 'static) -> Self {
            Self {
                answer: Box::new(answer),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl ToolRunner for FakeRunner {
        fn run(&self, inv: &ToolInvocation) -> ToolOutcome {
            self.calls
                .borrow_mut()
                .push(format!("{}:{}", inv.stage, inv.program_name()));
            (self.answer)(inv)
        }
    }

    fn ok() -> ToolOutcome {
        ToolOutcome::Completed {
            success: true,
            output: String::new(),
        }
    }

    fn fail(output: &str) -> ToolOutcome {
        ToolOutcome::Completed {
            success: false,
            output: output.to_string(),
        }
    }

    fn project(with_test: bool) -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.py"), "import os\n\nos.getcwd()\n").unwrap();
        if with_test {
            fs::write(dir.path().join("test_app.py"), "def test_x():\n    assert True\n").unwrap();
        }
        dir
    }

    fn verify_with(runner: FakeRunner, with_test: bool) -> VerificationReport {
        let dir = project(with_test);
        let bug = sample_bug("B000001", Severity::High, 0.7);
        StagedVerifier::with_runner(runner, VerifySettings::default())
            .verify(dir.path(), &bug)
            .unwrap()
    }

    #[test]
    fn test_all_stages_pass() {
        let report = verify_with(FakeRunner::new(|_| ok()), true);
        assert!(report.passed);
        assert!((report.confidence - 1.0).abs() < 1e-9);
        assert_eq!(report.checks.len(), 4);
        assert!(!report.retryable);
    }

    #[test]
    fn test_syntax_failure_ends_verification() {
        let runner = FakeRunner::new(|inv| {
            if inv.stage == SYNTAX_STAGE {
                fail("Line 3: invalid syntax")
            } else {
                ok()
            }
        });
        let report = verify_with(runner, true);
        assert!(!report.passed);
        assert_eq!(report.confidence, 0.0);
        assert!(!report.retryable);
        assert!(!report.syntax_passed());
        assert_eq!(report.checks.len(), 1);
        assert_eq!(report.issues, vec!["Syntax error: Line 3: invalid syntax"]);
    }

    #[test]
    fn test_penalties_accumulate() {
        let runner = FakeRunner::new(|inv| match inv.stage {
            "imports" => fail("requests"),
            "lint" => fail("app.py:1:1: F401 unused import"),
            "tests" => fail("F\n1 failed in 0.01s\n"),
            _ => ok(),
        });
        let report = verify_with(runner, true);
        // 1.0 - 0.2 - 0.15 - 0.3
        assert!((report.confidence - 0.35).abs() < 1e-9);
        assert!(!report.passed);
        assert!(report.retryable);
        assert_eq!(report.issues.len(), 3);
        assert!(report.issues[2].contains("1 failed"));
    }

    #[test]
    fn test_missing_tools_are_skipped_without_penalty() {
        let runner = FakeRunner::new(|inv| {
            if inv.stage == SYNTAX_STAGE {
                ok()
            } else {
                ToolOutcome::NotFound
            }
        });
        let report = verify_with(runner, true);
        assert!(report.passed);
        assert!((report.confidence - 1.0).abs() < 1e-9);
        let skipped = report
            .checks
            .iter()
            .filter(|c| c.status == CheckStatus::Skipped)
            .count();
        assert_eq!(skipped, 3);
    }

    #[test]
    fn test_lint_falls_through_to_next_linter() {
        let runner = FakeRunner::new(|inv| match inv.program_name().as_str() {
            "ruff" => ToolOutcome::NotFound,
            "flake8" => fail("app.py:3:1: E999"),
            _ => ok(),
        });
        let report = verify_with(runner, false);
        let lint = report.checks.iter().find(|c| c.name == "lint").unwrap();
        assert_eq!(lint.status, CheckStatus::Failed);
        assert!(lint.message.starts_with("flake8:"));
        assert!((report.confidence - 0.85).abs() < 1e-9);
        assert!(report.passed);
    }

    #[test]
    fn test_timeout_is_a_failed_stage() {
        let runner = FakeRunner::new(|inv| {
            if inv.stage == "lint" {
                ToolOutcome::TimedOut
            } else {
                ok()
            }
        });
        let report = verify_with(runner, false);
        let lint = report.checks.iter().find(|c| c.name == "lint").unwrap();
        assert_eq!(lint.status, CheckStatus::Failed);
        assert!(lint.message.contains("timed out after 30s"));
    }

    #[test]
    fn test_no_test_file_means_no_test_penalty() {
        let runner = FakeRunner::new(|inv| if inv.stage == "tests" { fail("boom") } else { ok() });
        let report = verify_with(runner, false);
        let tests = report.checks.iter().find(|c| c.name == "tests").unwrap();
        assert_eq!(tests.status, CheckStatus::Skipped);
        assert!((report.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_file_is_not_retryable() {
        let dir = tempdir().unwrap();
        let bug = sample_bug("B000002", Severity::High, 0.7);
        let report = StagedVerifier::with_runner(FakeRunner::new(|_| ok()), VerifySettings::default())
            .verify(dir.path(), &bug)
            .unwrap();
        assert!(!report.passed);
        assert!(!report.retryable);
    }

    #[test]
    fn test_pre_apply_falls_back_to_balance_check() {
        let verifier =
            StagedVerifier::with_runner(FakeRunner::new(|_| ToolOutcome::NotFound), VerifySettings::default());
        let file = Path::new("/p/app.py");
        assert_eq!(verifier.check_before_apply("x = (1, 2)\n", file, "python"), PreApply::Valid);
        assert!(matches!(
            verifier.check_before_apply("x = (1, 2\n", file, "python"),
            PreApply::Invalid(_)
        ));
    }

    #[test]
    fn test_pre_apply_uses_interpreter_verdict() {
        let verifier = StagedVerifier::with_runner(
            FakeRunner::new(|_| fail("Line 1: invalid syntax")),
            VerifySettings::default(),
        );
        assert_eq!(
            verifier.check_before_apply("def (:\n", Path::new("/p/app.py"), "python"),
            PreApply::Invalid("Line 1: invalid syntax".to_string())
        );
    }

    #[test]
    fn test_python_modules() {
        let modules = python_modules(
            "import os, sys.path\nfrom collections import deque\nfrom . import local\nfrom .pkg import x\n  import json\n",
        );
        let names: Vec<&str> = modules.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["collections", "json", "os", "sys"]);
    }
}
