//! CLI integration tests for switchyard
//!
//! Tests the switchyard CLI commands end-to-end using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Isolated config and store directories for one test
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let workspace = Self {
            dir: TempDir::new().unwrap(),
        };
        let root = workspace.path("store");
        workspace
            .cmd()
            .args(["config", "set", "store.root", root.to_str().unwrap()])
            .assert()
            .success();
        workspace
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[allow(deprecated)]
    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("switchyard").unwrap();
        cmd.env("SWITCHYARD_CONFIG_DIR", self.dir.path().join("config"));
        cmd.env("RUST_LOG", "warn");
        cmd
    }

    fn export(&self, version: &str) -> PathBuf {
        let routing = self.write(
            "routing.json",
            r#"{"arms": ["fast", "planner", "deep"], "alpha": 0.5, "feature_dim": 28}"#,
        );
        let tools = self.write("tools.json", r#"{"intents": {"billing": ["invoice_lookup"]}}"#);
        let output = self.path(&format!("{}.json", version));
        self.cmd()
            .args(["export", "--package-version", version])
            .arg("--routing")
            .arg(&routing)
            .arg("--tools")
            .arg(&tools)
            .arg("--output")
            .arg(&output)
            .assert()
            .success()
            .stdout(predicate::str::contains(format!("Exported package {}", version)));
        output
    }

    fn promote(&self, package: &Path, stage: &str) {
        self.cmd()
            .arg("promote")
            .arg(package)
            .args(["--stage", stage])
            .assert()
            .success()
            .stdout(predicate::str::contains("Promoted"));
    }
}

#[test]
fn test_config_set_get_and_list() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["config", "set", "canary.traffic_percent", "12.5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Set canary.traffic_percent = 12.5"));

    ws.cmd()
        .args(["config", "get", "canary.traffic_percent"])
        .assert()
        .success()
        .stdout(predicate::str::contains("12.5"));

    ws.cmd()
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bandit.arms = fast, planner, deep"))
        .stdout(predicate::str::contains("store.root ="));

    assert!(ws.path("config").join("config.toml").exists());
}

#[test]
fn test_config_rejects_bad_values() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["config", "set", "canary.traffic_percent", "250"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("traffic_percent"));

    ws.cmd()
        .args(["config", "get", "no.such.key"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));
}

#[test]
fn test_config_reset() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["config", "set", "bandit.alpha", "0.25"])
        .assert()
        .success();

    ws.cmd()
        .args(["config", "reset"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration reset"));

    ws.cmd()
        .args(["config", "get", "bandit.alpha"])
        .assert()
        .success()
        .stdout(predicate::str::diff("1\n"));
}

#[test]
fn test_export_promote_rollback_cycle() {
    let ws = Workspace::new();
    let v1 = ws.export("v1");
    let v2 = ws.export("v2");

    ws.promote(&v1, "prod");
    ws.promote(&v2, "prod");

    let output = ws
        .cmd()
        .args(["status", "--stage", "prod", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status[0]["active"]["version"], "v2");
    assert_eq!(status[0]["snapshots"], 2);

    ws.cmd()
        .args(["rollback", "--stage", "prod"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rolled back prod to v1"));

    ws.cmd()
        .args(["status", "--stage", "prod"])
        .assert()
        .success()
        .stdout(predicate::str::contains("prod: v1"));

    ws.cmd()
        .args(["snapshots", "--stage", "prod"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(empty)"));

    ws.cmd()
        .args(["rollback", "--stage", "prod"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no package is active"));

    ws.cmd()
        .args(["rollback", "--stage", "prod"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No rollback snapshot"));
}

#[test]
fn test_invalid_package_requires_force() {
    let ws = Workspace::new();
    let routing = ws.write("routing.json", r#"{"alpha": 1.0}"#);
    let output = ws.path("bad.json");

    ws.cmd()
        .args(["export", "--package-version", "bad"])
        .arg("--routing")
        .arg(&routing)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("INVALID"))
        .stdout(predicate::str::contains("missing required field 'arms'"));

    ws.cmd()
        .arg("promote")
        .arg(&output)
        .args(["--stage", "canary"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("marked invalid"));

    ws.cmd()
        .arg("promote")
        .arg(&output)
        .args(["--stage", "canary", "--force"])
        .assert()
        .success();
}

#[test]
fn test_canary_summary_of_empty_log() {
    let ws = Workspace::new();
    ws.cmd()
        .arg("canary-summary")
        .arg("--log")
        .arg(ws.path("missing.jsonl"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Canary comparisons: 0"));
}

#[test]
fn test_replay_writes_state() {
    let ws = Workspace::new();
    let lines = [
        r#"{"session_id": "a", "intent": "billing", "arm": "deep", "tool": "invoice_lookup", "context": {"intent": "billing"}, "outcome": {"success": true}}"#,
        r#"{"session_id": "b", "intent": "billing", "arm": "deep", "tool": "invoice_lookup", "context": {"intent": "billing"}, "outcome": {"success": true}}"#,
        r#"{"session_id": "c", "intent": "faq", "arm": "fast", "context": {"intent": "faq"}, "outcome": {"success": false}}"#,
        r#"{"session_id": "d", "intent": "faq", "arm": "fast", "context": {"intent": "faq"}, "outcome": {"success": true, "latency_ms": 900}}"#,
    ];
    let archive = ws.write("episodes.jsonl", &(lines.join("\n") + "\n"));

    ws.cmd()
        .arg("replay")
        .arg("--archive")
        .arg(&archive)
        .args(["--stage", "prod", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Replayed 4 episodes"))
        .stdout(predicate::str::contains("Dry run"));
    assert!(!ws.path("store").join("prod").join("state").join("routing.json").exists());

    ws.cmd()
        .arg("replay")
        .arg("--archive")
        .arg(&archive)
        .args(["--stage", "prod"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Trained arms: fast, deep"));

    let state = ws.path("store").join("prod").join("state");
    assert!(state.join("routing.json").exists());
    assert!(state.join("tools.json").exists());
}

#[test]
fn test_replay_without_episodes_fails() {
    let ws = Workspace::new();
    ws.cmd()
        .arg("replay")
        .arg("--archive")
        .arg(ws.path("none.jsonl"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("No episodes"));
}
