//! E2E tests for `tl`: scenarios, simulation, config and completions.
//!
//! Each test runs the binary as a subprocess in an isolated temp directory
//! with its own user config home.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

const WORKSPACE_REQUEST: &str = include_str!("../../../demos/workspace_request.json");
const SPLIT: &str = include_str!("../../../demos/split.json");

fn tl_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tl"));
    cmd.current_dir(dir);
    cmd.env("HOME", dir);
    cmd.env("XDG_CONFIG_HOME", dir.join(".config"));
    cmd.env("TALLY_LOG", "error");
    cmd.env_remove("FORMAT");
    cmd
}

fn json_output(cmd: &mut Command) -> Value {
    let output = cmd.output().expect("tl should not crash");
    assert!(
        output.status.success(),
        "tl failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid JSON on stdout")
}

fn write_scenario(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write scenario");
    path.display().to_string()
}

#[test]
fn help_lists_the_commands() {
    let dir = TempDir::new().expect("tempdir");
    tl_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("sim"))
        .stdout(predicate::str::contains("config"))
        .stdout(predicate::str::contains("completions"));
}

#[test]
fn completions_name_the_binary() {
    let dir = TempDir::new().expect("tempdir");
    tl_cmd(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("_tl"));
}

#[test]
fn a_rejected_request_is_retried_to_completion() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_scenario(dir.path(), "request.json", WORKSPACE_REQUEST);
    let out = json_output(tl_cmd(dir.path()).args(["run", &path, "--json"]));

    let steps = out["steps"].as_array().expect("steps");
    assert_eq!(steps.len(), 5);
    assert_eq!(steps[0]["result"], "dispatched");
    assert_eq!(steps[1]["result"], "settled");
    assert_eq!(steps[3]["result"], "retried");
    assert_eq!(steps[3]["dispatched"], 1);
    assert_eq!(out["in_flight"], 0);
    assert!(out["pending_retries"].as_array().expect("retries").is_empty());

    let cache = out["cache"].as_object().expect("cache");
    let txn = cache
        .iter()
        .find(|(k, _)| k.starts_with("transaction:"))
        .map(|(_, v)| v)
        .expect("a transaction");
    assert_eq!(txn["amount"], -4250);
}

#[test]
fn a_split_writes_one_transaction_per_share() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_scenario(dir.path(), "split.json", SPLIT);
    let out = json_output(tl_cmd(dir.path()).args(["run", &path, "--json"]));
    let transactions = out["cache"]
        .as_object()
        .expect("cache")
        .keys()
        .filter(|k| k.starts_with("transaction:"))
        .count();
    // The parent plus one per participant.
    assert!(transactions >= 3, "only {transactions} transactions");
}

#[test]
fn key_filter_limits_the_cache() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_scenario(dir.path(), "split.json", SPLIT);
    let out = json_output(tl_cmd(dir.path()).args(["run", &path, "--keys", "personalDetails:", "--json"]));
    let cache = out["cache"].as_object().expect("cache");
    assert!(!cache.is_empty());
    assert!(cache.keys().all(|k| k.starts_with("personalDetails:")));
}

#[test]
fn text_output_has_one_line_per_step() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_scenario(dir.path(), "request.json", WORKSPACE_REQUEST);
    tl_cmd(dir.path())
        .args(["run", &path, "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("step=0 kind=run op=create_request result=dispatched"))
        .stdout(predicate::str::contains("step=3 kind=retry_all attempted=1 dispatched=1"));
}

#[test]
fn strict_mode_fails_on_a_refused_operation() {
    let dir = TempDir::new().expect("tempdir");
    let body = r#"{
        "actor": { "accountID": 1, "login": "alice@example.com" },
        "steps": [
            { "step": "run", "operation": { "op": "hold_request", "transaction_id": "t1", "reason": " " } }
        ]
    }"#;
    let path = write_scenario(dir.path(), "bad.json", body);

    tl_cmd(dir.path())
        .args(["run", &path, "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"result\": \"failed\""));

    tl_cmd(dir.path())
        .args(["run", &path, "--strict"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("hold_request"));
}

#[test]
fn a_missing_scenario_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    tl_cmd(dir.path())
        .args(["run", "nope.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

#[test]
fn config_show_reports_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let out = json_output(tl_cmd(dir.path()).args(["config", "show", "--json"]));
    assert_eq!(out["resolved_output"], "json");
    assert_eq!(out["engine"]["violations"]["enabled"], true);
    assert_eq!(out["engine"]["requests"]["default_currency"], "USD");
}

#[test]
fn config_set_persists_to_the_project() {
    let dir = TempDir::new().expect("tempdir");
    tl_cmd(dir.path())
        .args(["config", "set", "next_step.enabled", "false", "--json"])
        .assert()
        .success();
    assert!(dir.path().join(".tally/config.toml").exists());

    let out = json_output(tl_cmd(dir.path()).args(["config", "show", "--json"]));
    assert_eq!(out["engine"]["next_step"]["enabled"], false);

    tl_cmd(dir.path())
        .args(["config", "set", "search.semantic", "true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported key"));
}

#[test]
fn sim_run_passes_a_small_campaign() {
    let dir = TempDir::new().expect("tempdir");
    let out = json_output(tl_cmd(dir.path()).args([
        "sim", "run", "--seeds", "4", "--steps", "25", "--json",
    ]));
    assert_eq!(out["seeds_run"], 4);
    assert_eq!(out["all_passed"], true);
}

#[test]
fn sim_rejects_batching_with_failures() {
    let dir = TempDir::new().expect("tempdir");
    tl_cmd(dir.path())
        .args(["sim", "run", "--seeds", "1", "--max-in-flight", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_in_flight"));
}

#[test]
fn sim_replay_prints_the_trace() {
    let dir = TempDir::new().expect("tempdir");
    tl_cmd(dir.path())
        .args(["sim", "replay", "3", "--steps", "10", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("replay seed=3"))
        .stdout(predicate::str::contains("step=0 actor="));
}
