//! CLI tests for `autotask init`, `add`, `tasks` and `run`.
//!
//! Spawns the autotask binary in a temporary directory and checks exit codes
//! and printed JSON.

use std::process::{Command, Output};

use autotask::exit_codes;
use autotask::io::config::load_config;
use serde_json::Value;

fn autotask(dir: &std::path::Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_autotask"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn autotask")
}

#[test]
fn init_writes_config_and_empty_task_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = autotask(temp.path(), &["init"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));

    let cfg = load_config(&temp.path().join("autotask.toml")).expect("config");
    assert_eq!(cfg.orchestrator.max_attempts, 2);
    let tasks = std::fs::read_to_string(temp.path().join(".autotask/tasks.json")).expect("tasks");
    assert_eq!(tasks.trim(), "[]");
}

#[test]
fn run_with_empty_backlog_exits_idle() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert_eq!(autotask(temp.path(), &["init"]).status.code(), Some(0));

    let out = autotask(temp.path(), &["run", "--user", "alice"]);
    assert_eq!(out.status.code(), Some(exit_codes::IDLE));
    let report: Value = serde_json::from_slice(&out.stdout).expect("report json");
    assert_eq!(report["finished"], Value::Bool(true));
    assert_eq!(report["outcome"]["kind"], Value::String("idle".to_string()));
}

#[test]
fn add_then_list_tasks() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert_eq!(autotask(temp.path(), &["init"]).status.code(), Some(0));

    let main = autotask(temp.path(), &["add", "--user", "alice", "--title", "Digest"]);
    assert_eq!(main.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&main.stdout).trim(), "task-1");

    let sub = autotask(
        temp.path(),
        &["add", "--user", "alice", "--title", "Draft", "--parent", "task-1"],
    );
    assert_eq!(sub.status.code(), Some(exit_codes::OK));

    let orphan = autotask(
        temp.path(),
        &["add", "--user", "alice", "--title", "Lost", "--parent", "nope"],
    );
    assert_eq!(orphan.status.code(), Some(exit_codes::INVALID));

    let listed = autotask(temp.path(), &["tasks", "--user", "alice"]);
    let tasks: Value = serde_json::from_slice(&listed.stdout).expect("tasks json");
    let tasks = tasks.as_array().expect("array");
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[1]["parent_id"], Value::String("task-1".to_string()));
    assert_eq!(tasks[1]["status"], Value::String("undone".to_string()));
}

#[test]
fn invalid_config_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        temp.path().join("autotask.toml"),
        "[orchestrator]\nmax_attempts = 0\n",
    )
    .expect("write config");
    let out = autotask(temp.path(), &["run", "--user", "alice"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
}
