//! Shared fakes for workflow tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use querygate::approval::{ApprovalAction, ApprovalQueueClient, ApprovalRequest, ApprovalResponse, Confidence};
use querygate::config::ApprovalConfig;
use querygate::notify::{Notification, Notifier};
use querygate::queue::QueuePair;
use querygate::services::{Candidate, ExecutionReport, Executor, Generator};
use querygate::{Error, Result, WorkflowEngine};

/// Generator that derives candidates from its inputs
pub struct FakeGenerator;

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(&self, question: &str, _schema_context: &str) -> Result<Candidate> {
        Ok(Candidate {
            artifact: format!("SELECT * FROM orders /* {} */", question),
            explanation: "All orders".to_string(),
            confidence: Confidence::Medium,
            referenced_entities: vec!["orders".to_string()],
        })
    }

    async fn refine(&self, prior: &str, feedback: &str, _schema_context: &str) -> Result<Candidate> {
        Ok(Candidate {
            artifact: refined(prior, feedback),
            explanation: format!("Applied: {}", feedback),
            confidence: Confidence::High,
            referenced_entities: vec!["orders".to_string()],
        })
    }
}

/// What `FakeGenerator::refine` produces
pub fn refined(prior: &str, feedback: &str) -> String {
    format!("{} -- {}", prior, feedback)
}

/// Executor that records what it ran
pub struct FakeExecutor {
    pub succeed: bool,
    pub executed: Mutex<Vec<String>>,
}

impl FakeExecutor {
    pub fn new(succeed: bool) -> Self {
        Self {
            succeed,
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn execute(&self, artifact: &str) -> Result<ExecutionReport> {
        self.executed.lock().unwrap().push(artifact.to_string());
        if self.succeed {
            Ok(ExecutionReport::success(serde_json::json!({ "rows": 42 })))
        } else {
            Ok(ExecutionReport::failure("permission denied on orders"))
        }
    }
}

/// Notifier that is always down
pub struct DownNotifier;

#[async_trait]
impl Notifier for DownNotifier {
    fn name(&self) -> &str {
        "down"
    }

    async fn notify(&self, _notification: &Notification) -> Result<()> {
        Err(Error::Notification("connection refused".to_string()))
    }
}

pub fn settings(max_refinements: u32) -> ApprovalConfig {
    ApprovalConfig {
        timeout: Duration::from_secs(600),
        poll_interval: Duration::from_secs(20),
        max_refinements,
    }
}

pub struct Harness {
    pub engine: WorkflowEngine,
    pub client: Arc<ApprovalQueueClient>,
    pub executor: Arc<FakeExecutor>,
}

pub fn harness(max_refinements: u32, execution_succeeds: bool) -> Harness {
    let client = Arc::new(ApprovalQueueClient::new(QueuePair::in_memory()));
    let executor = Arc::new(FakeExecutor::new(execution_succeeds));
    let engine = WorkflowEngine::new(
        settings(max_refinements),
        client.clone(),
        Arc::new(FakeGenerator),
        executor.clone(),
        Arc::new(DownNotifier),
    );

    Harness {
        engine,
        client,
        executor,
    }
}

/// One scripted decision
pub fn step(action: ApprovalAction, feedback: Option<&str>) -> (ApprovalAction, Option<String>) {
    (action, feedback.map(String::from))
}

/// Answer pending requests in order with the scripted decisions, returning
/// the requests that were answered once the script runs out
pub fn spawn_approver(
    client: Arc<ApprovalQueueClient>,
    script: Vec<(ApprovalAction, Option<String>)>,
) -> JoinHandle<Vec<ApprovalRequest>> {
    tokio::spawn(async move {
        let mut script: VecDeque<_> = script.into();
        let mut answered = Vec::new();

        while !script.is_empty() {
            for request in client.list_pending().await.unwrap() {
                let Some((action, feedback)) = script.pop_front() else {
                    break;
                };
                let response = ApprovalResponse::new(&request.thread_id, action, feedback)
                    .unwrap()
                    .with_round(request.round);
                client.submit(&response).await.unwrap();
                answered.push(request);
            }
            tokio::time::sleep(Duration::from_secs(3)).await;
        }

        answered
    })
}
