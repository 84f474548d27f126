//! CLI Integration Tests
//!
//! Tests the command-line interface end-to-end.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get the binary to test.
fn pipewright() -> Command {
    Command::cargo_bin("pipewright").unwrap()
}

#[test]
fn test_help_flag() {
    pipewright()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Staged delivery pipeline"));
}

#[test]
fn test_version_flag() {
    pipewright()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_run_command_help() {
    pipewright()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("four-stage workflow"));
}

#[test]
fn test_config_path() {
    pipewright()
        .args(["config", "--path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_renders_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.toml");
    pipewright()
        .args(["--config", path.to_str().unwrap(), "config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[tool]"))
        .stdout(predicate::str::contains("[runner]"));
}

#[test]
fn test_chat_rejects_unknown_stage() {
    pipewright()
        .args(["chat", "deployer", "hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown stage"));
}

#[test]
fn test_resume_of_unknown_session_fails() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    let store = dir.path().join("store");
    std::fs::write(&config, format!("[store]\ndir = {:?}\n", store.to_str().unwrap())).unwrap();

    pipewright()
        .args(["--config", config.to_str().unwrap(), "resume", "no-such-session"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown session"));
}

#[test]
fn test_run_executes_full_pipeline_with_fake_tool() {
    let dir = TempDir::new().unwrap();
    let workspace = dir.path().join("ws");
    std::fs::create_dir(&workspace).unwrap();

    let tool = dir.path().join("fake-tool.sh");
    std::fs::write(
        &tool,
        "#!/bin/sh\ncase \"$1\" in\n  *\"You are the Planner\"*) echo \"requirements: reverse strings\";;\n  *) echo ok;;\nesac\n",
    )
    .unwrap();

    let store = dir.path().join("store");
    let config = dir.path().join("config.toml");
    std::fs::write(
        &config,
        format!(
            "[tool]\ncommand = \"sh\"\nargs = [{:?}]\n\n[store]\ndir = {:?}\n",
            tool.to_str().unwrap(),
            store.to_str().unwrap()
        ),
    )
    .unwrap();

    pipewright()
        .args([
            "--config",
            config.to_str().unwrap(),
            "run",
            "build a CLI that reverses strings",
            "--workspace",
            workspace.to_str().unwrap(),
            "--session",
            "cli-e2e",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("workflow completed"))
        .stdout(predicate::str::contains("status:  completed"));

    // The requirements artifact landed in the workspace and the session
    // record in the store
    assert!(workspace.join("REQUIREMENTS.md").exists());
    assert!(store.join("workflows").join("cli-e2e.json").exists());
}

#[test]
fn test_failed_workflow_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    let workspace = dir.path().join("ws");
    std::fs::create_dir(&workspace).unwrap();

    let tool = dir.path().join("fake-tool.sh");
    std::fs::write(&tool, "#!/bin/sh\necho broken >&2\nexit 1\n").unwrap();

    let store = dir.path().join("store");
    let config = dir.path().join("config.toml");
    std::fs::write(
        &config,
        format!(
            "[tool]\ncommand = \"sh\"\nargs = [{:?}]\n\n[store]\ndir = {:?}\n",
            tool.to_str().unwrap(),
            store.to_str().unwrap()
        ),
    )
    .unwrap();

    pipewright()
        .args([
            "--config",
            config.to_str().unwrap(),
            "run",
            "anything",
            "--workspace",
            workspace.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stdout(predicate::str::contains("workflow failed at Planner"));
}
