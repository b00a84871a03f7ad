//! Integration tests for conductor
//!
//! These tests drive the binary end to end against temporary projects.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a conductor Command
fn conductor() -> Command {
    let mut cmd = cargo_bin_cmd!("conductor");
    cmd.env_remove("CONDUCTOR_AGENT_CMD").env_remove("RUST_LOG");
    cmd
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn write_file(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Initialise a git repository with one commit and return its SHA
fn init_repo_with_commit(dir: &Path) -> String {
    let repo = git2::Repository::init(dir).unwrap();
    fs::write(dir.join("README.md"), "hello\n").unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new("README.md")).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = git2::Signature::now("test", "test@test.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
        .unwrap()
        .to_string()
}

fn read_state(dir: &Path) -> serde_json::Value {
    let content = fs::read_to_string(dir.join("specs/.pipeline-state.json")).unwrap();
    serde_json::from_str(&content).unwrap()
}

const PROGRESS_PLAN: &str = r#"
[[step]]
op = "update_progress"
phase = "setup"
status = "started"

[[step]]
op = "report_progress"
message = "setting things up"

[[step]]
op = "update_progress"
phase = "setup"
status = "completed"
"#;

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_conductor_help() {
        conductor()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("rollback"));
    }

    #[test]
    fn test_conductor_version() {
        conductor().arg("--version").assert().success();
    }

    #[test]
    fn test_run_requires_task_or_continue() {
        let dir = create_temp_project();
        conductor()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .failure();
    }
}

// =============================================================================
// Port allocation
// =============================================================================

mod port {
    use super::*;
    use conductor::ports::preferred_port;

    #[test]
    fn test_port_reports_hash_preferred_port() {
        let dir = create_temp_project();
        let expected = preferred_port("postgres", "/p/a", 5400, 256).unwrap().unwrap();

        let output = conductor()
            .current_dir(dir.path())
            .args(["port", "postgres", "--project", "/p/a", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let assignment: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(assignment["service"], "postgres");
        assert_eq!(assignment["preferred"], u64::from(expected));
        let port = assignment["port"].as_u64().unwrap();
        assert!((5400..5656).contains(&port) || (10000..=20000).contains(&port));
    }

    #[test]
    fn test_port_is_stable_across_invocations() {
        let dir = create_temp_project();
        let run = || {
            let output = conductor()
                .current_dir(dir.path())
                .args(["port", "svc", "--base", "41000", "--project", "/p/stable", "--json"])
                .output()
                .unwrap();
            let v: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
            v["preferred"].clone()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_port_unknown_service_needs_base() {
        let dir = create_temp_project();
        conductor()
            .current_dir(dir.path())
            .args(["port", "cassandra"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--base"));
    }

    #[test]
    fn test_port_uses_configured_base() {
        let dir = create_temp_project();
        write_file(
            dir.path(),
            ".conductor/conductor.toml",
            "[ports.base]\nminio = 42000\n",
        );
        let expected = preferred_port("minio", "/p/m", 42000, 256).unwrap().unwrap();

        conductor()
            .current_dir(dir.path())
            .args(["port", "minio", "--project", "/p/m", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains(format!("\"preferred\": {}", expected)));
    }
}

// =============================================================================
// Lock handling
// =============================================================================

mod lock {
    use super::*;

    #[test]
    fn test_unlock_without_lock() {
        let dir = create_temp_project();
        conductor()
            .current_dir(dir.path())
            .arg("unlock")
            .assert()
            .success()
            .stdout(predicate::str::contains("No lock file"));
    }

    #[test]
    fn test_unlock_removes_stale_lock() {
        let dir = create_temp_project();
        write_file(dir.path(), ".pipeline.lock", "999999999");

        conductor()
            .current_dir(dir.path())
            .arg("unlock")
            .assert()
            .success()
            .stdout(predicate::str::contains("stale lock"));
        assert!(!dir.path().join(".pipeline.lock").exists());
    }

    #[test]
    fn test_unlock_refuses_live_holder() {
        let dir = create_temp_project();
        write_file(dir.path(), ".pipeline.lock", &std::process::id().to_string());

        conductor()
            .current_dir(dir.path())
            .arg("unlock")
            .assert()
            .failure()
            .stderr(predicate::str::contains("--force"));
        assert!(dir.path().join(".pipeline.lock").exists());

        conductor()
            .current_dir(dir.path())
            .args(["unlock", "--force"])
            .assert()
            .success();
        assert!(!dir.path().join(".pipeline.lock").exists());
    }

    #[test]
    fn test_run_with_busy_lock_exits_2() {
        let dir = create_temp_project();
        write_file(dir.path(), ".conductor/conductor.plan.toml", PROGRESS_PLAN);
        write_file(dir.path(), ".pipeline.lock", &std::process::id().to_string());

        conductor()
            .current_dir(dir.path())
            .args(["run", "add health endpoint"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("another pipeline"));

        // Lock still belongs to the live holder and no state was written
        assert_eq!(
            fs::read_to_string(dir.path().join(".pipeline.lock")).unwrap(),
            std::process::id().to_string()
        );
        assert!(!dir.path().join("specs/.pipeline-state.json").exists());
    }
}

// =============================================================================
// Pipeline runs
// =============================================================================

mod run {
    use super::*;

    #[test]
    fn test_run_without_plan_fails() {
        let dir = create_temp_project();
        conductor()
            .current_dir(dir.path())
            .args(["run", "task"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No plan found"));
    }

    #[test]
    fn test_verbose_run_prints_resolved_settings() {
        let dir = create_temp_project();
        write_file(dir.path(), ".conductor/conductor.plan.toml", PROGRESS_PLAN);

        conductor()
            .current_dir(dir.path())
            .args(["--verbose", "run", "quiet task"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Agent command: claude"));

        conductor()
            .current_dir(dir.path())
            .args(["run", "quiet task"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Agent command").not());
    }

    #[test]
    fn test_run_records_progress_and_releases_lock() {
        let dir = create_temp_project();
        write_file(dir.path(), ".conductor/conductor.plan.toml", PROGRESS_PLAN);

        conductor()
            .current_dir(dir.path())
            .args(["run", "add health endpoint"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Pipeline finished"));

        let state = read_state(dir.path());
        assert_eq!(state["task"], "add health endpoint");
        assert_eq!(state["currentPhase"], "setup");
        assert_eq!(state["phases"].as_array().unwrap().len(), 2);
        assert!(state["meta"]["lastUpdated"].is_string());

        let progress = fs::read_to_string(dir.path().join("progress.txt")).unwrap();
        assert!(progress.contains("# Pipeline Progress"));
        assert!(progress.contains("add health endpoint"));
        assert!(!dir.path().join(".pipeline.lock").exists());
    }

    #[test]
    fn test_run_extracts_markers_from_agent_output() {
        let dir = create_temp_project();
        // `echo` prints its arguments, system prompt included, as the agent output
        write_file(
            dir.path(),
            ".conductor/conductor.toml",
            "[project]\nagent_cmd = \"echo\"\n",
        );
        write_file(
            dir.path(),
            "agents/git-setup.md",
            "You prepare branches.\nBRANCH: feature/health\n",
        );
        write_file(
            dir.path(),
            "plan.toml",
            "[[step]]\nop = \"run_agent\"\nagent_path = \"agents/git-setup.md\"\ninput = \"make a branch\"\n",
        );

        conductor()
            .current_dir(dir.path())
            .args(["run", "health", "--plan", "plan.toml"])
            .assert()
            .success();

        let state = read_state(dir.path());
        assert_eq!(state["branch"], "feature/health");
        let phases = state["phases"].as_array().unwrap();
        assert_eq!(phases.last().unwrap()["status"], "completed");
    }

    #[test]
    fn test_failed_agent_is_recorded() {
        let dir = create_temp_project();
        write_file(
            dir.path(),
            ".conductor/conductor.toml",
            "[project]\nagent_cmd = \"false\"\n\n[retry]\nmax_attempts = 1\n",
        );
        write_file(dir.path(), "agents/builder.md", "You build things.");
        write_file(
            dir.path(),
            ".conductor/conductor.plan.toml",
            "[[step]]\nop = \"run_agent\"\nagent_path = \"agents/builder.md\"\ninput = \"build\"\n",
        );

        conductor()
            .current_dir(dir.path())
            .args(["run", "build it"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("builder"));

        let state = read_state(dir.path());
        let phases = state["phases"].as_array().unwrap();
        assert_eq!(phases.last().unwrap()["status"], "failed");
        assert!(!dir.path().join(".pipeline.lock").exists());
    }

    #[test]
    fn test_unknown_agent_is_rejected() {
        let dir = create_temp_project();
        write_file(
            dir.path(),
            ".conductor/conductor.plan.toml",
            "[[step]]\nop = \"run_agent\"\nagent_path = \"agents/ghost.md\"\ninput = \"boo\"\n",
        );

        conductor()
            .current_dir(dir.path())
            .args(["run", "haunt"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Unknown agent"));
    }

    #[test]
    fn test_continue_requires_state() {
        let dir = create_temp_project();
        write_file(dir.path(), ".conductor/conductor.plan.toml", PROGRESS_PLAN);

        conductor()
            .current_dir(dir.path())
            .args(["run", "--continue"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("no resumable pipeline state"));
    }

    #[test]
    fn test_continue_keeps_task() {
        let dir = create_temp_project();
        write_file(dir.path(), ".conductor/conductor.plan.toml", PROGRESS_PLAN);

        conductor()
            .current_dir(dir.path())
            .args(["run", "first task"])
            .assert()
            .success();
        conductor()
            .current_dir(dir.path())
            .args(["run", "--continue"])
            .assert()
            .success();

        let state = read_state(dir.path());
        assert_eq!(state["task"], "first task");
        assert_eq!(state["phases"].as_array().unwrap().len(), 4);
    }
}

// =============================================================================
// Status and rollback
// =============================================================================

mod state {
    use super::*;

    #[test]
    fn test_status_shows_head_at_base_commit() {
        let dir = create_temp_project();
        let sha = init_repo_with_commit(dir.path());
        write_file(
            dir.path(),
            "specs/.pipeline-state.json",
            &format!(r#"{{"task": "t", "baseCommit": "{}"}}"#, sha),
        );

        conductor()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains(&sha[..12]))
            .stdout(predicate::str::contains("at base commit"));
    }

    #[test]
    fn test_status_on_empty_project() {
        let dir = create_temp_project();
        conductor()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("free"))
            .stdout(predicate::str::contains("no pipeline state"));
    }

    #[test]
    fn test_status_shows_markers_and_phases() {
        let dir = create_temp_project();
        write_file(
            dir.path(),
            "specs/.pipeline-state.json",
            r#"{
  "task": "add health endpoint",
  "currentPhase": "tests",
  "phases": [
    {"phase": "tests", "status": "started", "timestamp": "2026-01-02T03:04:05Z", "details": {}}
  ],
  "baseCommit": "abc123",
  "testsFile": "specs/tests.json"
}"#,
        );

        conductor()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("add health endpoint"))
            .stdout(predicate::str::contains("abc123"))
            .stdout(predicate::str::contains("specs/tests.json"))
            .stdout(predicate::str::contains("started"));
    }

    #[test]
    fn test_rollback_without_confirm_leaves_state() {
        let dir = create_temp_project();
        let original = r#"{"task": "t", "baseCommit": "abc123", "branch": "feature/x"}"#;
        write_file(dir.path(), "specs/.pipeline-state.json", original);

        conductor()
            .current_dir(dir.path())
            .arg("rollback")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("confirm='yes'"));

        assert_eq!(
            fs::read_to_string(dir.path().join("specs/.pipeline-state.json")).unwrap(),
            original
        );
    }

    #[test]
    fn test_rollback_without_base_commit_fails() {
        let dir = create_temp_project();
        let original = r#"{"task": "t"}"#;
        write_file(dir.path(), "specs/.pipeline-state.json", original);

        conductor()
            .current_dir(dir.path())
            .args(["rollback", "--confirm", "yes"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("no baseCommit"));

        assert_eq!(
            fs::read_to_string(dir.path().join("specs/.pipeline-state.json")).unwrap(),
            original
        );
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_init_then_show() {
        let dir = create_temp_project();

        conductor()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created conductor.toml"));
        assert!(dir.path().join(".conductor/conductor.toml").exists());

        conductor()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        conductor()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_attempts = 3"))
            .stdout(predicate::str::contains("agent_cmd = \"claude\""));
    }

    #[test]
    fn test_config_show_honors_env_agent_cmd() {
        let dir = create_temp_project();
        conductor()
            .current_dir(dir.path())
            .env("CONDUCTOR_AGENT_CMD", "/opt/agent")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("agent_cmd = \"/opt/agent\""));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        write_file(
            dir.path(),
            ".conductor/conductor.toml",
            "[parallel]\nmax_agents = 20\n",
        );

        conductor()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_agents = 20"));
    }
}
