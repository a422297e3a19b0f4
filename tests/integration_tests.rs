//! Integration tests for the anvil binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Helper to create an anvil Command with a clean environment
fn anvil() -> Command {
    let mut cmd = cargo_bin_cmd!("anvil");
    cmd.env_remove("ANVIL_AGENT_CMD")
        .env_remove("ANVIL_MODEL")
        .env_remove("ANVIL_ALLOW_ALL_TOOLS");
    cmd
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// Initialize a git repository with a two-task plan.
fn create_git_project() -> TempDir {
    let dir = create_temp_project();
    git2::Repository::init(dir.path()).unwrap();
    fs::create_dir_all(dir.path().join("plans")).unwrap();
    fs::write(
        dir.path().join("plans/cache.yml"),
        "title: Cache\ntasks:\n  - title: Add the cache module\n  - title: Wire the cache into the CLI\n",
    )
    .unwrap();
    dir
}

/// Write an executable fake agent that answers every phase with `result`.
fn fake_agent(dir: &Path, result: &str) -> PathBuf {
    let script = dir.join("fake-claude");
    fs::write(
        &script,
        format!(
            "#!/bin/sh\ncat > /dev/null\necho change >> work.txt\nprintf '%s\\n' '{{\"type\":\"result\",\"subtype\":\"success\",\"result\":\"{}\",\"is_error\":false}}'\n",
            result
        ),
    )
    .unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    }
    script
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_anvil_help() {
        anvil()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("permission-bridge").not());
    }

    #[test]
    fn test_anvil_version() {
        anvil().arg("--version").assert().success();
    }

    #[test]
    fn test_run_help_lists_flags() {
        anvil()
            .args(["run", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--capture"))
            .stdout(predicate::str::contains("--disallow"))
            .stdout(predicate::str::contains("--permission-timeout"));
    }

    #[test]
    fn test_run_rejects_unknown_backend() {
        let dir = create_temp_project();
        anvil()
            .current_dir(dir.path())
            .args(["run", "plan.yml", "--backend", "gemini"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("gemini"));
    }
}

// =============================================================================
// Config Command Tests
// =============================================================================

mod config_cmd {
    use super::*;

    #[test]
    fn test_config_init_creates_file() {
        let dir = create_temp_project();

        anvil()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created anvil.toml"));

        let content = fs::read_to_string(dir.path().join(".anvil/anvil.toml")).unwrap();
        assert!(content.contains("[orchestration]"));
        assert!(content.contains("max_fix_iterations = 5"));
    }

    #[test]
    fn test_config_init_does_not_overwrite() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".anvil")).unwrap();
        fs::write(dir.path().join(".anvil/anvil.toml"), "[agent]\nmodel = \"opus\"\n").unwrap();

        anvil()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        let content = fs::read_to_string(dir.path().join(".anvil/anvil.toml")).unwrap();
        assert_eq!(content, "[agent]\nmodel = \"opus\"\n");
    }

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();

        anvil()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using default configuration"))
            .stdout(predicate::str::contains("backend = \"claude\""));
    }

    #[test]
    fn test_config_show_env_override() {
        let dir = create_temp_project();

        anvil()
            .current_dir(dir.path())
            .env("ANVIL_AGENT_CMD", "/opt/bin/claude-wrapper")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("command = \"/opt/bin/claude-wrapper\""));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".anvil")).unwrap();
        fs::write(
            dir.path().join(".anvil/anvil.toml"),
            "[orchestration]\nmax_fix_iterations = 0\n",
        )
        .unwrap();

        anvil()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_fix_iterations = 0"));
    }

    #[test]
    fn test_config_invalid_toml_fails() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".anvil")).unwrap();
        fs::write(dir.path().join(".anvil/anvil.toml"), "[agent\n").unwrap();

        anvil()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Permissions Command Tests
// =============================================================================

mod permissions_cmd {
    use super::*;

    #[test]
    fn test_permissions_list_reads_settings() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".claude")).unwrap();
        fs::write(
            dir.path().join(".claude/settings.local.json"),
            r#"{"permissions":{"allow":["Read","Bash(cargo test:*)"],"deny":["WebFetch"]}}"#,
        )
        .unwrap();
        fs::create_dir_all(dir.path().join(".anvil")).unwrap();
        fs::write(
            dir.path().join(".anvil/anvil.toml"),
            "[permissions]\nshared_store = false\n",
        )
        .unwrap();

        anvil()
            .current_dir(dir.path())
            .args(["permissions", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Bash(cargo test:*)"))
            .stdout(predicate::str::contains("WebFetch"))
            .stdout(predicate::str::contains("2 effective allow rule(s)"));
    }
}

// =============================================================================
// Run Command Tests
// =============================================================================

mod run_cmd {
    use super::*;

    #[test]
    fn test_run_outside_git_repository_fails() {
        let dir = create_temp_project();
        fs::write(dir.path().join("plan.yml"), "tasks: []\n").unwrap();

        anvil()
            .current_dir(dir.path())
            .args(["run", "plan.yml"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("git repository"));
    }

    #[test]
    fn test_run_missing_plan_fails() {
        let dir = create_git_project();

        anvil()
            .current_dir(dir.path())
            .args(["run", "plans/missing.yml"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Plan file not found"));
    }

    #[test]
    fn test_run_with_fake_agent_marks_task() {
        let dir = create_git_project();
        let bin = create_temp_project();
        let agent = fake_agent(
            bin.path(),
            "Done.\\n\\nCompleted tasks:\\n- Add the cache module\\n\\nVERDICT: ACCEPTABLE",
        );

        anvil()
            .current_dir(dir.path())
            .env("ANVIL_AGENT_CMD", &agent)
            .args(["run", "plans/cache.yml", "--allow-all-tools", "--capture", "result"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"success\": true"))
            .stdout(predicate::str::contains("Add the cache module"));

        let plan = fs::read_to_string(dir.path().join("plans/cache.yml")).unwrap();
        let plan: serde_yaml::Value = serde_yaml::from_str(&plan).unwrap();
        assert_eq!(plan["tasks"][0]["done"], serde_yaml::Value::Bool(true));
        assert_ne!(plan["tasks"][1]["done"], serde_yaml::Value::Bool(true));
        assert_eq!(plan["title"], serde_yaml::Value::from("Cache"));
    }

    #[test]
    fn test_run_failed_phase_exits_with_error() {
        let dir = create_git_project();
        let bin = create_temp_project();
        let agent = fake_agent(bin.path(), "FAILED: cannot build the workspace");

        anvil()
            .current_dir(dir.path())
            .env("ANVIL_AGENT_CMD", &agent)
            .args(["run", "plans/cache.yml", "--allow-all-tools", "--capture", "result"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("\"success\": false"))
            .stdout(predicate::str::contains("\"sourceAgent\": \"implementer\""));

        let plan = fs::read_to_string(dir.path().join("plans/cache.yml")).unwrap();
        assert!(!plan.contains("done: true"));
    }
}

// =============================================================================
// Permission Bridge Tests
// =============================================================================

mod bridge {
    use super::*;

    #[test]
    fn test_bridge_answers_initialize_and_denies_without_gateway() {
        let dir = create_temp_project();
        let socket = dir.path().join("missing.sock");
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"approval_prompt","arguments":{"tool_name":"Bash","input":{"command":"ls"}}}}"#,
            "\n",
        );

        anvil()
            .arg("permission-bridge")
            .arg("--socket")
            .arg(&socket)
            .write_stdin(input)
            .assert()
            .success()
            .stdout(predicate::str::contains("anvil_permissions"))
            .stdout(predicate::str::contains("deny"));
    }
}
