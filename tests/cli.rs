use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use querygate::approval::Confidence;
use querygate::queue::{DirQueue, QueuePair};
use querygate::{ApprovalAction, ApprovalQueueClient, ApprovalRequest};

struct Workspace {
    dir: TempDir,
    config: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let queues = dir.path().join("queues");
        let config = dir.path().join("config.toml");
        fs::write(
            &config,
            format!(
                "[queue]\nkind = \"directory\"\ndirectory = {:?}\n",
                queues.to_string_lossy()
            ),
        )
        .unwrap();
        Self { dir, config }
    }

    fn queues(&self) -> PathBuf {
        self.dir.path().join("queues")
    }

    fn client(&self) -> ApprovalQueueClient {
        let base = self.queues();
        ApprovalQueueClient::new(QueuePair {
            requests: Arc::new(DirQueue::open(&base, "approval-requests").unwrap()),
            responses: Arc::new(DirQueue::open(&base, "approval-responses").unwrap()),
        })
    }

    fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("querygate");
        cmd.current_dir(self.dir.path())
            .env("HOME", self.dir.path())
            .env_remove("QUERYGATE_CONFIG")
            .env("RUST_LOG", "warn")
            .arg("--config")
            .arg(&self.config);
        cmd
    }
}

fn request(thread_id: &str) -> ApprovalRequest {
    ApprovalRequest {
        thread_id: thread_id.to_string(),
        artifact: "SELECT count(*) FROM orders".to_string(),
        explanation: "Counts orders".to_string(),
        confidence: Confidence::High,
        referenced_entities: vec!["orders".to_string()],
        round: 0,
    }
}

fn files_in(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).count())
        .unwrap_or(0)
}

#[test]
fn refine_without_feedback_is_refused() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["respond", "t1", "refine"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Refine requires non-empty feedback"));

    assert_eq!(files_in(&ws.queues().join("approval-responses")), 0);
}

#[test]
fn unknown_action_is_refused() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["respond", "t1", "maybe"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown action"));
}

#[test]
fn pending_lists_waiting_requests() {
    let ws = Workspace::new();

    ws.cmd()
        .arg("pending")
        .assert()
        .success()
        .stdout(predicate::str::contains("No pending approvals"));

    let client = ws.client();
    tokio_test::block_on(client.send_request(&request("t-pending"))).unwrap();

    let output = ws.cmd().args(["pending", "--json"]).output().unwrap();
    assert!(output.status.success());
    let listed: Vec<ApprovalRequest> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(listed, vec![request("t-pending")]);

    // Listing is read-only
    assert_eq!(tokio_test::block_on(client.list_pending()).unwrap().len(), 1);
}

#[test]
fn respond_enqueues_decision_and_clears_request() {
    let ws = Workspace::new();
    let client = ws.client();
    tokio_test::block_on(client.send_request(&request("t1"))).unwrap();
    tokio_test::block_on(client.send_request(&request("t2"))).unwrap();

    ws.cmd()
        .args(["respond", "t1", "refine", "--feedback", "only last 30 days", "--round", "0"])
        .assert()
        .success();

    let pending = tokio_test::block_on(client.list_pending()).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].thread_id, "t2");

    let response = tokio_test::block_on(client.poll_for_response(
        "t1",
        Some(0),
        Duration::from_secs(2),
        Duration::from_millis(100),
    ))
    .unwrap();
    assert_eq!(response.action, ApprovalAction::Refine);
    assert_eq!(response.feedback.as_deref(), Some("only last 30 days"));
}

#[test]
fn respond_from_file() {
    let ws = Workspace::new();
    tokio_test::block_on(ws.client().send_request(&request("t9"))).unwrap();
    let decision = ws.dir.path().join("decision.json");
    fs::write(&decision, r#"{"thread_id":"t9","action":"reject"}"#).unwrap();

    ws.cmd()
        .args(["respond", "--file"])
        .arg(&decision)
        .assert()
        .success();

    let response = tokio_test::block_on(ws.client().poll_for_response(
        "t9",
        None,
        Duration::from_secs(2),
        Duration::from_millis(100),
    ))
    .unwrap();
    assert_eq!(response.action, ApprovalAction::Reject);
    assert_eq!(response.round, Some(0));
}

#[test]
fn respond_without_pending_request_fails() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["respond", "gone", "approve"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("NotPending"));

    assert_eq!(files_in(&ws.queues().join("approval-responses")), 0);
}

#[test]
fn respond_file_is_validated() {
    let ws = Workspace::new();
    let decision = ws.dir.path().join("decision.json");
    fs::write(&decision, r#"{"thread_id":"t9","action":"approve","feedback":"ship it"}"#).unwrap();

    ws.cmd()
        .args(["respond", "--file"])
        .arg(&decision)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Feedback is only allowed with refine"));
}

#[test]
fn config_shows_effective_settings() {
    let ws = Workspace::new();

    ws.cmd()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("[approval]"))
        .stdout(predicate::str::contains("max_refinements = 3"))
        .stdout(predicate::str::contains("kind = \"directory\""));
}

#[test]
fn missing_explicit_config_fails() {
    let ws = Workspace::new();

    let mut cmd = cargo_bin_cmd!("querygate");
    cmd.current_dir(ws.dir.path())
        .env("HOME", ws.dir.path())
        .args(["--config", "does-not-exist.toml", "pending"])
        .assert()
        .failure();
}
