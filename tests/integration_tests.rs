//! Integration tests for remedy
//!
//! These drive the binary end to end against scratch projects.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use remedy::session::{BugStatus, SessionDocument, SessionMode, SessionStore};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const VULNERABLE_APP: &str = "import os\nuser_cmd = input()\nos.system(user_cmd)\n";

/// Helper to create a remedy Command with logging silenced
fn remedy() -> Command {
    let mut cmd = cargo_bin_cmd!("remedy");
    cmd.env_remove("REMEDY_LOG")
        .env_remove("REMEDY_MAX_STEPS")
        .env_remove("REMEDY_MAX_ATTEMPTS");
    cmd
}

/// Helper to create a temporary project holding one vulnerable file
fn create_temp_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("app.py"), VULNERABLE_APP).unwrap();
    dir
}

fn create_git_project() -> TempDir {
    let dir = create_temp_project();
    git2::Repository::init(dir.path()).unwrap();
    dir
}

fn init_session(dir: &TempDir) {
    remedy()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

fn load(dir: &Path) -> SessionDocument {
    SessionStore::new(dir.join(".remedy/state.yaml")).load().unwrap()
}

fn first_bug_id(dir: &Path) -> String {
    load(dir).bugs.first().expect("scan found a bug").id.clone()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_remedy_help() {
        remedy().arg("--help").assert().success();
    }

    #[test]
    fn test_remedy_version() {
        remedy().arg("--version").assert().success();
    }

    #[test]
    fn test_status_without_session_fails() {
        let dir = create_temp_project();
        remedy()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .failure()
            .stderr(predicate::str::contains("No active session"));
    }

    #[test]
    fn test_project_dir_flag() {
        let dir = create_temp_project();
        remedy()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("init")
            .assert()
            .success();
        assert!(dir.path().join(".remedy/state.yaml").exists());
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let dir = create_temp_project();
        remedy()
            .current_dir(dir.path())
            .args(["init", "--mode", "yolo"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Session lifecycle
// =============================================================================

mod session {
    use super::*;

    #[test]
    fn test_init_creates_layout() {
        let dir = create_temp_project();

        remedy()
            .current_dir(dir.path())
            .args(["init", "--goal", "harden the app", "--mode", "confirm"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized remedy session"))
            .stdout(predicate::str::contains("Checkpoints unavailable"));

        let remedy_dir = dir.path().join(".remedy");
        assert!(remedy_dir.join("state.yaml").exists());
        assert!(remedy_dir.join("ignore-rules.yaml").exists());
        assert_eq!(fs::read_to_string(remedy_dir.join(".gitignore")).unwrap(), "*\n");

        let doc = load(dir.path());
        assert_eq!(doc.session.goal, "harden the app");
        assert_eq!(doc.session.mode, SessionMode::Confirm);
        assert!(doc.session.id.starts_with("sess-"));
    }

    #[test]
    fn test_init_refuses_existing_session_without_force() {
        let dir = create_temp_project();
        init_session(&dir);
        let first = load(dir.path()).session.id;

        remedy()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .failure()
            .stderr(predicate::str::contains("already exists"));
        assert_eq!(load(dir.path()).session.id, first);

        remedy()
            .current_dir(dir.path())
            .args(["init", "--force"])
            .assert()
            .success();
    }

    #[test]
    fn test_init_in_git_repo_records_checkpoint() {
        let dir = create_git_project();
        init_session(&dir);

        let doc = load(dir.path());
        assert_eq!(doc.checkpoints.len(), 1);
        assert_eq!(doc.checkpoints[0].msg, "Session initialized");

        let repo = git2::Repository::open(dir.path()).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.message(), Some("[remedy] Session initialized"));
        let tree = head.tree().unwrap();
        assert!(tree.get_path(Path::new("app.py")).is_ok());
        assert!(tree.get_path(Path::new(".remedy/state.yaml")).is_err());
    }

    #[test]
    fn test_status_after_scan() {
        let dir = create_temp_project();
        init_session(&dir);
        remedy().current_dir(dir.path()).arg("scan").assert().success();

        remedy()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Bugs: 1"))
            .stdout(predicate::str::contains("app.py:3"));
    }
}

// =============================================================================
// Single-step commands
// =============================================================================

mod single_steps {
    use super::*;

    #[test]
    fn test_scan_records_findings() {
        let dir = create_temp_project();
        init_session(&dir);

        remedy()
            .current_dir(dir.path())
            .args(["scan", "--categories", "security"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Found:   1"));

        let doc = load(dir.path());
        assert_eq!(doc.bugs.len(), 1);
        assert_eq!(doc.bugs[0].status, BugStatus::Pending);
        assert_eq!(doc.bugs[0].location.line, 3);

        // unchanged input keeps the same id
        remedy().current_dir(dir.path()).arg("scan").assert().success();
        let again = load(dir.path());
        assert_eq!(again.bugs.len(), 1);
        assert_eq!(again.bugs[0].id, doc.bugs[0].id);
    }

    #[test]
    fn test_scan_rejects_unknown_category() {
        let dir = create_temp_project();
        init_session(&dir);
        remedy()
            .current_dir(dir.path())
            .args(["scan", "--categories", "style"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown category"));
    }

    #[test]
    fn test_fix_unknown_bug_fails() {
        let dir = create_temp_project();
        init_session(&dir);
        remedy()
            .current_dir(dir.path())
            .args(["fix", "BFFFFFF"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not found"));
    }

    #[test]
    fn test_verify_requires_fixed_status() {
        let dir = create_temp_project();
        init_session(&dir);
        remedy().current_dir(dir.path()).arg("scan").assert().success();
        let id = first_bug_id(dir.path());

        remedy()
            .current_dir(dir.path())
            .args(["verify", &id])
            .assert()
            .failure()
            .stderr(predicate::str::contains("requires fixed"));
        assert_eq!(load(dir.path()).bugs[0].status, BugStatus::Pending);
    }

    #[test]
    fn test_test_requires_verified_status() {
        let dir = create_temp_project();
        init_session(&dir);
        remedy().current_dir(dir.path()).arg("scan").assert().success();
        let id = first_bug_id(dir.path());

        remedy()
            .current_dir(dir.path())
            .args(["test", &id])
            .assert()
            .failure()
            .stderr(predicate::str::contains("requires verified"));
    }

    #[test]
    fn test_fix_applies_template() {
        let dir = create_temp_project();
        init_session(&dir);
        remedy().current_dir(dir.path()).arg("scan").assert().success();
        let id = first_bug_id(dir.path());

        remedy()
            .current_dir(dir.path())
            .args(["fix", &id])
            .assert()
            .success()
            .stdout(predicate::str::contains("Fixed"));

        let content = fs::read_to_string(dir.path().join("app.py")).unwrap();
        assert!(!content.contains("os.system("));
        let doc = load(dir.path());
        assert_eq!(doc.bugs[0].status, BugStatus::Fixed);
        assert_eq!(doc.bugs[0].attempts(), 1);
    }

    #[test]
    fn test_rollback_without_checkpoint_fails() {
        let dir = create_temp_project();
        init_session(&dir);
        remedy().current_dir(dir.path()).arg("scan").assert().success();
        let id = first_bug_id(dir.path());

        remedy()
            .current_dir(dir.path())
            .args(["rollback", &id])
            .assert()
            .failure()
            .stderr(predicate::str::contains("no checkpoint"));
    }

    #[test]
    fn test_fix_then_rollback_in_git_repo() {
        let dir = create_git_project();
        init_session(&dir);
        remedy().current_dir(dir.path()).arg("scan").assert().success();
        let id = first_bug_id(dir.path());

        remedy().current_dir(dir.path()).args(["fix", &id]).assert().success();
        assert_ne!(fs::read_to_string(dir.path().join("app.py")).unwrap(), VULNERABLE_APP);

        remedy()
            .current_dir(dir.path())
            .args(["rollback", &id])
            .assert()
            .success()
            .stdout(predicate::str::contains("Rolled back"));

        assert_eq!(fs::read_to_string(dir.path().join("app.py")).unwrap(), VULNERABLE_APP);
        let doc = load(dir.path());
        assert_eq!(doc.bugs[0].status, BugStatus::Pending);
        assert!(doc.bugs[0].fix.is_none());
        assert!(doc.bugs[0].checkpoint.is_some());
    }
}

// =============================================================================
// Full pipeline
// =============================================================================

mod pipeline {
    use super::*;

    #[test]
    fn test_run_without_git_exits_zero() {
        let dir = create_temp_project();

        remedy()
            .current_dir(dir.path())
            .args(["run", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Run complete"))
            .stdout(predicate::str::contains("Scanned:  1"));

        let doc = load(dir.path());
        assert_eq!(doc.bugs.len(), 1);
        assert_ne!(doc.bugs[0].status, BugStatus::Pending);
    }

    #[test]
    fn test_run_fails_when_session_exists() {
        let dir = create_temp_project();
        init_session(&dir);

        remedy()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("remedy resume"));
    }

    #[test]
    fn test_run_in_git_repo_checkpoints_every_fix() {
        let dir = create_git_project();

        remedy().current_dir(dir.path()).arg("run").assert().success();

        let doc = load(dir.path());
        let messages: Vec<&str> = doc.checkpoints.iter().map(|c| c.msg.as_str()).collect();
        assert_eq!(messages.first(), Some(&"Session initialized"));
        assert_eq!(messages.last(), Some(&"Pipeline complete"));
        let id = &doc.bugs[0].id;
        assert!(messages.contains(&format!("Before fixing {id}").as_str()));
        assert!(messages.contains(&format!("Fixed {id}").as_str()));
    }

    #[test]
    fn test_scan_only_run_leaves_files_untouched() {
        let dir = create_temp_project();

        remedy()
            .current_dir(dir.path())
            .args(["run", "--mode", "scan-only"])
            .assert()
            .success();

        assert_eq!(fs::read_to_string(dir.path().join("app.py")).unwrap(), VULNERABLE_APP);
        assert_eq!(load(dir.path()).bugs[0].status, BugStatus::Pending);
    }

    #[test]
    fn test_step_ceiling_from_env_halts_before_first_bug() {
        let dir = create_temp_project();

        remedy()
            .current_dir(dir.path())
            .env("REMEDY_MAX_STEPS", "1")
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("step ceiling"))
            .stdout(predicate::str::contains("Skipped:  1"));

        assert_eq!(load(dir.path()).bugs[0].status, BugStatus::Pending);
    }

    #[test]
    fn test_resume_continues_halted_session() {
        let dir = create_temp_project();
        remedy()
            .current_dir(dir.path())
            .args(["run", "--max-steps", "1"])
            .assert()
            .success();

        remedy()
            .current_dir(dir.path())
            .arg("resume")
            .assert()
            .success()
            .stdout(predicate::str::contains("Resuming session"));

        assert_ne!(load(dir.path()).bugs[0].status, BugStatus::Pending);
    }
}

// =============================================================================
// Reports
// =============================================================================

mod reports {
    use super::*;

    #[test]
    fn test_report_formats() {
        let dir = create_temp_project();
        init_session(&dir);
        remedy().current_dir(dir.path()).arg("scan").assert().success();

        remedy()
            .current_dir(dir.path())
            .arg("report")
            .assert()
            .success()
            .stdout(predicate::str::contains("REMEDY SESSION REPORT"));

        remedy()
            .current_dir(dir.path())
            .args(["report", "--format", "markdown"])
            .assert()
            .success()
            .stdout(predicate::str::contains("# Remedy Session Report"));

        let output = remedy()
            .current_dir(dir.path())
            .args(["report", "--format", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(json["bugs"].as_array().unwrap().len(), 1);

        remedy()
            .current_dir(dir.path())
            .args(["report", "--format", "trajectory"])
            .assert()
            .success()
            .stdout(predicate::str::contains("exit_status"));
    }

    #[test]
    fn test_report_without_session_fails() {
        let dir = create_temp_project();
        remedy()
            .current_dir(dir.path())
            .arg("report")
            .assert()
            .failure();
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();
        remedy()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using default configuration"))
            .stdout(predicate::str::contains("max_steps = 50"));
    }

    #[test]
    fn test_config_init_creates_toml() {
        let dir = create_temp_project();
        remedy()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created remedy.toml"));

        let content = fs::read_to_string(dir.path().join(".remedy/remedy.toml")).unwrap();
        assert!(content.contains("[pipeline]"));
        assert!(content.contains("[verify]"));
    }

    #[test]
    fn test_config_validate() {
        let dir = create_temp_project();
        remedy()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using defaults (valid)"));

        fs::create_dir_all(dir.path().join(".remedy")).unwrap();
        fs::write(
            dir.path().join(".remedy/remedy.toml"),
            "[pipeline]\npass_threshold = 0.3\nretry_floor = 0.4\n",
        )
        .unwrap();
        remedy()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("retry_floor"));
    }

    #[test]
    fn test_invalid_config_stops_other_commands() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".remedy")).unwrap();
        fs::write(
            dir.path().join(".remedy/remedy.toml"),
            "[pipeline]\nmax_attempts = 0\n",
        )
        .unwrap();
        remedy()
            .current_dir(dir.path())
            .args(["scan"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("max_attempts"));
    }

    #[test]
    fn test_config_max_steps_flag_shows_in_effective_values() {
        let dir = create_temp_project();
        remedy()
            .current_dir(dir.path())
            .args(["--max-steps", "9", "config"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_steps = 9"));
    }
}
