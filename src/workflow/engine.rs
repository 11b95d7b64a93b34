//! Workflow engine
//!
//! Drives one run through the fixed graph. Phases run strictly in order on
//! the calling task; the only suspension point is the bounded wait for a
//! decision.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::routing::{route, Route};
use super::state::{StateUpdate, WorkflowState};
use crate::approval::ApprovalQueueClient;
use crate::config::ApprovalConfig;
use crate::notify::{Notification, Notifier};
use crate::services::{ExecutionReport, Executor, Generator};
use crate::{Error, Result};

/// Position in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Generate,
    AwaitApproval,
    Refine,
    Execute,
    Finalize,
    Failed,
}

/// Owns the state machine. Cheap to share: every collaborator is behind an
/// `Arc`, and no per-run data lives here.
pub struct WorkflowEngine {
    settings: ApprovalConfig,
    queue: Arc<ApprovalQueueClient>,
    generator: Arc<dyn Generator>,
    executor: Arc<dyn Executor>,
    notifier: Arc<dyn Notifier>,
}

impl WorkflowEngine {
    pub fn new(
        settings: ApprovalConfig,
        queue: Arc<ApprovalQueueClient>,
        generator: Arc<dyn Generator>,
        executor: Arc<dyn Executor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            queue,
            generator,
            executor,
            notifier,
        }
    }

    /// Run the workflow for `question` to a terminal state.
    ///
    /// Never fails: every outcome, including errors, is reported through the
    /// returned state.
    pub async fn run(&self, question: &str, schema_context: &str) -> WorkflowState {
        let mut state = WorkflowState::new(question, schema_context);
        info!("Starting run {}", state.thread_id);

        let mut phase = Phase::Generate;
        loop {
            let step = match phase {
                Phase::Generate => self.generate(&mut state).await,
                Phase::AwaitApproval => self.await_approval(&mut state).await,
                Phase::Refine => self.refine(&mut state).await,
                Phase::Execute => self.execute(&mut state).await,
                Phase::Finalize | Phase::Failed => break,
            };

            phase = match step {
                Ok(next) => {
                    debug!("{}: {:?} -> {:?}", state.thread_id, phase, next);
                    next
                }
                Err(e) => {
                    error!("Run {} failed in {:?}: {}", state.thread_id, phase, e);
                    if let Err(e) = state.apply(StateUpdate::Failed(e.to_string())) {
                        warn!("Could not record failure: {}", e);
                    }
                    Phase::Failed
                }
            };
        }

        info!("Run {} finished: {}", state.thread_id, state.outcome());
        self.announce(&Notification::run_finished(&state)).await;
        state
    }

    async fn generate(&self, state: &mut WorkflowState) -> Result<Phase> {
        let candidate = self
            .generator
            .generate(&state.question, &state.schema_context)
            .await
            .map_err(generation_error)?;

        state.apply(StateUpdate::Generated(candidate))?;
        Ok(Phase::AwaitApproval)
    }

    async fn await_approval(&self, state: &mut WorkflowState) -> Result<Phase> {
        let request = state.approval_request()?;

        // The request must be out before we start listening for its answer
        self.queue.send_request(&request).await?;
        self.announce(&Notification::approval_requested(&request))
            .await;

        let response = self
            .queue
            .poll_for_response(
                &state.thread_id,
                Some(request.round),
                self.settings.timeout,
                self.settings.poll_interval,
            )
            .await;

        match response {
            Some(response) => state.apply(StateUpdate::Decided(response))?,
            None => {
                state.apply(StateUpdate::TimedOut)?;
                // Nobody should act on a request whose run has given up
                if let Err(e) = self.queue.withdraw_request(&state.thread_id).await {
                    warn!("Failed to withdraw request for {}: {}", state.thread_id, e);
                }
            }
        }

        let next = match route(state.approval_decision) {
            Route::Execute => Phase::Execute,
            Route::Refine => Phase::Refine,
            Route::FinalizeRejected => {
                info!("Run {} rejected", state.thread_id);
                Phase::Finalize
            }
            Route::FinalizeTimedOut => {
                info!("Run {} timed out waiting for approval", state.thread_id);
                Phase::Finalize
            }
        };
        Ok(next)
    }

    async fn refine(&self, state: &mut WorkflowState) -> Result<Phase> {
        if state.refinement_count >= self.settings.max_refinements {
            return Err(Error::RefinementBudgetExhausted(state.refinement_count));
        }

        let (prior, feedback) = match (&state.artifact, &state.feedback) {
            (Some(prior), Some(feedback)) => (prior.clone(), feedback.clone()),
            _ => {
                return Err(Error::InvalidTransition(
                    "refine without candidate or feedback".to_string(),
                ))
            }
        };

        info!(
            "Refining {} (round {}): {}",
            state.thread_id,
            state.refinement_count + 1,
            feedback
        );
        let candidate = self
            .generator
            .refine(&prior, &feedback, &state.schema_context)
            .await
            .map_err(generation_error)?;

        state.apply(StateUpdate::Refined(candidate))?;
        Ok(Phase::AwaitApproval)
    }

    async fn execute(&self, state: &mut WorkflowState) -> Result<Phase> {
        let artifact = state
            .artifact
            .clone()
            .ok_or_else(|| Error::InvalidTransition("nothing to execute".to_string()))?;

        info!("Executing approved query for {}", state.thread_id);
        // One attempt only; a failure is an outcome, not an error
        let report = match self.executor.execute(&artifact).await {
            Ok(report) => report,
            Err(e) => {
                warn!("Execution failed for {}: {}", state.thread_id, e);
                ExecutionReport::failure(e.to_string())
            }
        };

        state.apply(StateUpdate::Executed(report))?;
        Ok(Phase::Finalize)
    }

    /// Best-effort broadcast; failures are logged and dropped
    async fn announce(&self, notification: &Notification) {
        if let Err(e) = self.notifier.notify(notification).await {
            warn!("Notification via {} failed: {}", self.notifier.name(), e);
        }
    }
}

fn generation_error(e: Error) -> Error {
    match e {
        Error::Generation(_) => e,
        other => Error::Generation(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalAction, Confidence};
    use crate::queue::{MemoryQueue, QueuePair};
    use crate::services::Candidate;
    use crate::workflow::Outcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, question: &str, _: &str) -> Result<Candidate> {
            Ok(Candidate {
                artifact: format!("-- {}\nSELECT 1", question),
                explanation: "echo".to_string(),
                confidence: Confidence::Low,
                referenced_entities: vec![],
            })
        }

        async fn refine(&self, prior: &str, feedback: &str, _: &str) -> Result<Candidate> {
            Ok(Candidate {
                artifact: format!("{} -- {}", prior, feedback),
                explanation: "echo".to_string(),
                confidence: Confidence::Low,
                referenced_entities: vec![],
            })
        }
    }

    struct BrokenGenerator;

    #[async_trait]
    impl Generator for BrokenGenerator {
        async fn generate(&self, _: &str, _: &str) -> Result<Candidate> {
            Err(Error::Config("model endpoint missing".to_string()))
        }

        async fn refine(&self, _: &str, _: &str, _: &str) -> Result<Candidate> {
            Err(Error::Generation("model unavailable".to_string()))
        }
    }

    struct CountingExecutor(AtomicUsize);

    #[async_trait]
    impl Executor for CountingExecutor {
        async fn execute(&self, _: &str) -> Result<ExecutionReport> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(Error::Execution("warehouse offline".to_string()))
        }
    }

    struct SilentNotifier;

    #[async_trait]
    impl Notifier for SilentNotifier {
        fn name(&self) -> &str {
            "silent"
        }

        async fn notify(&self, _: &Notification) -> Result<()> {
            Err(Error::Notification("unreachable".to_string()))
        }
    }

    fn settings() -> ApprovalConfig {
        ApprovalConfig {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            max_refinements: 2,
        }
    }

    fn engine(
        generator: Arc<dyn Generator>,
        executor: Arc<dyn Executor>,
    ) -> (WorkflowEngine, Arc<ApprovalQueueClient>, Arc<MemoryQueue>) {
        let requests = Arc::new(MemoryQueue::new("requests"));
        let client = Arc::new(ApprovalQueueClient::new(QueuePair {
            requests: requests.clone(),
            responses: Arc::new(MemoryQueue::new("responses")),
        }));
        let engine = WorkflowEngine::new(
            settings(),
            client.clone(),
            generator,
            executor,
            Arc::new(SilentNotifier),
        );
        (engine, client, requests)
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_failure_fails_without_queue_traffic() {
        let executor = Arc::new(CountingExecutor(AtomicUsize::new(0)));
        let (engine, _, requests) = engine(Arc::new(BrokenGenerator), executor.clone());

        let state = engine.run("q", "s").await;
        assert!(matches!(state.outcome(), Outcome::Failed(ref e) if e.starts_with("Generation failed")));
        assert!(requests.is_empty().await);
        assert_eq!(executor.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execution_error_becomes_failed_outcome() {
        let executor = Arc::new(CountingExecutor(AtomicUsize::new(0)));
        let (engine, client, requests) = engine(Arc::new(EchoGenerator), executor.clone());

        let approver = tokio::spawn(async move {
            loop {
                if let Some(request) = client.list_pending().await.unwrap().pop() {
                    client
                        .send_response(&request.thread_id, ApprovalAction::Approve, None)
                        .await
                        .unwrap();
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });

        let state = engine.run("q", "s").await;
        approver.await.unwrap();

        assert_eq!(
            state.outcome(),
            Outcome::ExecutionFailed("Execution failed: warehouse offline".to_string())
        );
        assert_eq!(state.execution_succeeded, Some(false));
        assert_eq!(executor.0.load(Ordering::SeqCst), 1);
        assert!(requests.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_withdraws_request() {
        let executor = Arc::new(CountingExecutor(AtomicUsize::new(0)));
        let (engine, _, requests) = engine(Arc::new(EchoGenerator), executor);

        let state = engine.run("q", "s").await;
        assert!(state.timed_out);
        assert_eq!(state.outcome(), Outcome::TimedOut);
        assert!(requests.is_empty().await);
    }
}
