//! Workflow run state
//!
//! One `WorkflowState` exists per run and is owned by that run alone. It is
//! changed only through [`WorkflowState::apply`], which checks each update
//! against the current state, so the invariants live here rather than being
//! spread across the engine:
//! - the correlation key and inputs never change
//! - a decision is recorded at most once per round, and a refinement always
//!   clears it again
//! - `refinement_count` only ever goes up
//! - the first recorded error wins

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::approval::{ApprovalAction, ApprovalRequest, ApprovalResponse, Confidence};
use crate::services::{Candidate, ExecutionReport};
use crate::{Error, Result};

/// Decision recorded for the current round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    Approve,
    Refine,
    Reject,
    /// No decision yet (or none arrived in time)
    Undetermined,
    /// Anything else read from outside; routed like a rejection
    #[serde(other)]
    Unrecognized,
}

impl Default for ApprovalDecision {
    fn default() -> Self {
        ApprovalDecision::Undetermined
    }
}

impl From<ApprovalAction> for ApprovalDecision {
    fn from(action: ApprovalAction) -> Self {
        match action {
            ApprovalAction::Approve => ApprovalDecision::Approve,
            ApprovalAction::Refine => ApprovalDecision::Refine,
            ApprovalAction::Reject => ApprovalDecision::Reject,
        }
    }
}

impl FromStr for ApprovalDecision {
    type Err = std::convert::Infallible;

    /// Never fails: unknown values become `Unrecognized`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "approve" => ApprovalDecision::Approve,
            "refine" => ApprovalDecision::Refine,
            "reject" => ApprovalDecision::Reject,
            "undetermined" => ApprovalDecision::Undetermined,
            _ => ApprovalDecision::Unrecognized,
        })
    }
}

/// How a run ended, derived from exactly one deciding field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Approved and executed successfully
    Executed,
    /// Approved, but execution failed
    ExecutionFailed(String),
    /// The approver rejected the candidate
    Rejected,
    /// No decision arrived in time
    TimedOut,
    /// Generation, refinement budget, or queue failure
    Failed(String),
    /// Not terminal yet
    Incomplete,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Executed => write!(f, "executed"),
            Outcome::ExecutionFailed(_) => write!(f, "execution failed"),
            Outcome::Rejected => write!(f, "rejected"),
            Outcome::TimedOut => write!(f, "timed out"),
            Outcome::Failed(_) => write!(f, "failed"),
            Outcome::Incomplete => write!(f, "incomplete"),
        }
    }
}

/// A single change to the run state
#[derive(Debug, Clone)]
pub enum StateUpdate {
    /// First candidate produced
    Generated(Candidate),
    /// The approver answered the current round
    Decided(ApprovalResponse),
    /// A revised candidate replaced the previous one
    Refined(Candidate),
    /// The current round expired without a decision
    TimedOut,
    /// The approved candidate was run
    Executed(ExecutionReport),
    /// The run cannot continue
    Failed(String),
}

/// Workflow run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Unique run ID, the correlation key for all queue traffic
    pub thread_id: String,
    /// Original request
    pub question: String,
    /// Opaque context handed to the generator
    pub schema_context: String,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the state last changed
    pub updated_at: DateTime<Utc>,

    /// Latest candidate
    pub artifact: Option<String>,
    pub explanation: Option<String>,
    pub confidence: Option<Confidence>,
    #[serde(default)]
    pub referenced_entities: Vec<String>,

    /// Decision for the current round
    #[serde(default)]
    pub approval_decision: ApprovalDecision,
    /// Refinement instructions, only while the decision is `refine`
    pub feedback: Option<String>,
    /// Refinements performed so far
    #[serde(default)]
    pub refinement_count: u32,
    /// Set when a round expired without a decision
    #[serde(default)]
    pub timed_out: bool,

    /// Execution metadata
    pub execution_result: Option<serde_json::Value>,
    pub execution_succeeded: Option<bool>,

    /// Terminal failure description
    pub error: Option<String>,
}

impl WorkflowState {
    /// Create the state for a new run, assigning its thread ID
    pub fn new(question: &str, schema_context: &str) -> Self {
        let now = Utc::now();
        Self {
            thread_id: Uuid::new_v4().to_string(),
            question: question.to_string(),
            schema_context: schema_context.to_string(),
            started_at: now,
            updated_at: now,
            artifact: None,
            explanation: None,
            confidence: None,
            referenced_entities: Vec::new(),
            approval_decision: ApprovalDecision::Undetermined,
            feedback: None,
            refinement_count: 0,
            timed_out: false,
            execution_result: None,
            execution_succeeded: None,
            error: None,
        }
    }

    /// Apply one update, rejecting it if it does not fit the current state
    pub fn apply(&mut self, update: StateUpdate) -> Result<()> {
        let is_failure = matches!(update, StateUpdate::Failed(_));
        if !is_failure && self.is_terminal() {
            return Err(Error::InvalidTransition(format!(
                "run {} already finished ({})",
                self.thread_id,
                self.outcome()
            )));
        }

        match update {
            StateUpdate::Generated(candidate) => {
                if self.artifact.is_some() {
                    return Err(Error::InvalidTransition(
                        "candidate already generated".to_string(),
                    ));
                }
                self.set_candidate(candidate);
            }
            StateUpdate::Decided(response) => {
                if self.artifact.is_none() {
                    return Err(Error::InvalidTransition(
                        "decision before any candidate".to_string(),
                    ));
                }
                if self.approval_decision != ApprovalDecision::Undetermined {
                    return Err(Error::InvalidTransition(format!(
                        "round {} already decided",
                        self.refinement_count
                    )));
                }
                if response.thread_id != self.thread_id {
                    return Err(Error::InvalidTransition(format!(
                        "decision for {} applied to {}",
                        response.thread_id, self.thread_id
                    )));
                }
                self.approval_decision = response.action.into();
                self.feedback = match response.action {
                    ApprovalAction::Refine => response.feedback,
                    _ => None,
                };
            }
            StateUpdate::Refined(candidate) => {
                if self.approval_decision != ApprovalDecision::Refine {
                    return Err(Error::InvalidTransition(
                        "refinement without a refine decision".to_string(),
                    ));
                }
                self.set_candidate(candidate);
                self.refinement_count += 1;
                self.approval_decision = ApprovalDecision::Undetermined;
                self.feedback = None;
            }
            StateUpdate::TimedOut => {
                if self.approval_decision != ApprovalDecision::Undetermined {
                    return Err(Error::InvalidTransition(
                        "timeout after a decision".to_string(),
                    ));
                }
                self.timed_out = true;
            }
            StateUpdate::Executed(report) => {
                if self.approval_decision != ApprovalDecision::Approve {
                    return Err(Error::InvalidTransition(
                        "execution without approval".to_string(),
                    ));
                }
                self.execution_succeeded = Some(report.succeeded);
                self.execution_result = Some(report.metadata);
                if !report.succeeded {
                    self.error = Some(
                        report
                            .error
                            .unwrap_or_else(|| "execution reported failure".to_string()),
                    );
                }
            }
            StateUpdate::Failed(reason) => {
                // First error wins
                if self.error.is_none() {
                    self.error = Some(reason);
                }
            }
        }

        self.updated_at = Utc::now();
        Ok(())
    }

    fn set_candidate(&mut self, candidate: Candidate) {
        self.artifact = Some(candidate.artifact);
        self.explanation = Some(candidate.explanation);
        self.confidence = Some(candidate.confidence);
        self.referenced_entities = candidate.referenced_entities;
    }

    /// Build the request for the current round
    pub fn approval_request(&self) -> Result<ApprovalRequest> {
        let artifact = self
            .artifact
            .clone()
            .ok_or_else(|| Error::InvalidTransition("no candidate to review".to_string()))?;

        Ok(ApprovalRequest {
            thread_id: self.thread_id.clone(),
            artifact,
            explanation: self.explanation.clone().unwrap_or_default(),
            confidence: self.confidence.unwrap_or_default(),
            referenced_entities: self.referenced_entities.clone(),
            round: self.refinement_count,
        })
    }

    /// The outcome, read from exactly one deciding field
    pub fn outcome(&self) -> Outcome {
        match (self.execution_succeeded, &self.error) {
            (Some(true), _) => Outcome::Executed,
            (Some(false), error) => {
                Outcome::ExecutionFailed(error.clone().unwrap_or_default())
            }
            (None, Some(error)) => Outcome::Failed(error.clone()),
            (None, None) if self.timed_out => Outcome::TimedOut,
            (None, None) => match self.approval_decision {
                ApprovalDecision::Reject | ApprovalDecision::Unrecognized => Outcome::Rejected,
                _ => Outcome::Incomplete,
            },
        }
    }

    /// Whether the run has reached FINALIZE or FAILED
    pub fn is_terminal(&self) -> bool {
        self.outcome() != Outcome::Incomplete
    }

    /// Human-readable summary
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Run: {}", self.thread_id),
            format!("Question: {}", self.question),
            format!("Outcome: {}", self.outcome()),
            format!("Refinements: {}", self.refinement_count),
        ];

        if let Some(artifact) = &self.artifact {
            lines.push(String::new());
            lines.push(artifact.clone());
        }
        if let Some(error) = &self.error {
            lines.push(String::new());
            lines.push(format!("Error: {}", error));
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(artifact: &str) -> Candidate {
        Candidate {
            artifact: artifact.to_string(),
            explanation: "because".to_string(),
            confidence: Confidence::Medium,
            referenced_entities: vec!["orders".to_string()],
        }
    }

    fn response(state: &WorkflowState, action: ApprovalAction, feedback: Option<&str>) -> ApprovalResponse {
        ApprovalResponse::new(&state.thread_id, action, feedback.map(String::from)).unwrap()
    }

    #[test]
    fn test_new_state() {
        let a = WorkflowState::new("how many orders?", "schema");
        let b = WorkflowState::new("how many orders?", "schema");

        assert_ne!(a.thread_id, b.thread_id);
        assert_eq!(a.approval_decision, ApprovalDecision::Undetermined);
        assert_eq!(a.outcome(), Outcome::Incomplete);
        assert!(a.approval_request().is_err());
    }

    #[test]
    fn test_refinement_resets_decision() {
        let mut state = WorkflowState::new("q", "s");
        state.apply(StateUpdate::Generated(candidate("v1"))).unwrap();

        let refine = response(&state, ApprovalAction::Refine, Some("last 30 days"));
        state.apply(StateUpdate::Decided(refine)).unwrap();
        assert_eq!(state.feedback.as_deref(), Some("last 30 days"));

        state.apply(StateUpdate::Refined(candidate("v2"))).unwrap();
        assert_eq!(state.refinement_count, 1);
        assert_eq!(state.approval_decision, ApprovalDecision::Undetermined);
        assert_eq!(state.feedback, None);
        assert_eq!(state.artifact.as_deref(), Some("v2"));
        assert_eq!(state.approval_request().unwrap().round, 1);
    }

    #[test]
    fn test_one_decision_per_round() {
        let mut state = WorkflowState::new("q", "s");
        state.apply(StateUpdate::Generated(candidate("v1"))).unwrap();

        let refine = response(&state, ApprovalAction::Refine, Some("x"));
        state.apply(StateUpdate::Decided(refine.clone())).unwrap();
        assert!(state.apply(StateUpdate::Decided(refine)).is_err());
    }

    #[test]
    fn test_rejects_out_of_order_updates() {
        let mut state = WorkflowState::new("q", "s");
        assert!(state
            .apply(StateUpdate::Executed(ExecutionReport::success(serde_json::Value::Null)))
            .is_err());
        assert!(state.apply(StateUpdate::Refined(candidate("v2"))).is_err());

        state.apply(StateUpdate::Generated(candidate("v1"))).unwrap();
        assert!(state.apply(StateUpdate::Generated(candidate("v1"))).is_err());

        let foreign = ApprovalResponse::new("someone-else", ApprovalAction::Approve, None).unwrap();
        assert!(state.apply(StateUpdate::Decided(foreign)).is_err());
    }

    #[test]
    fn test_first_error_wins_and_terminal_is_final() {
        let mut state = WorkflowState::new("q", "s");
        state.apply(StateUpdate::Failed("first".to_string())).unwrap();
        state.apply(StateUpdate::Failed("second".to_string())).unwrap();

        assert_eq!(state.outcome(), Outcome::Failed("first".to_string()));
        assert!(state.apply(StateUpdate::Generated(candidate("v1"))).is_err());
    }

    #[test]
    fn test_outcomes() {
        let mut executed = WorkflowState::new("q", "s");
        executed.apply(StateUpdate::Generated(candidate("v1"))).unwrap();
        let approve = response(&executed, ApprovalAction::Approve, None);
        executed.apply(StateUpdate::Decided(approve)).unwrap();
        executed
            .apply(StateUpdate::Executed(ExecutionReport::failure("table locked")))
            .unwrap();
        assert_eq!(
            executed.outcome(),
            Outcome::ExecutionFailed("table locked".to_string())
        );
        assert_eq!(executed.execution_succeeded, Some(false));

        let mut timed_out = WorkflowState::new("q", "s");
        timed_out.apply(StateUpdate::Generated(candidate("v1"))).unwrap();
        timed_out.apply(StateUpdate::TimedOut).unwrap();
        assert_eq!(timed_out.outcome(), Outcome::TimedOut);
        assert_eq!(timed_out.execution_succeeded, None);

        let mut rejected = WorkflowState::new("q", "s");
        rejected.apply(StateUpdate::Generated(candidate("v1"))).unwrap();
        let reject = response(&rejected, ApprovalAction::Reject, None);
        rejected.apply(StateUpdate::Decided(reject)).unwrap();
        assert_eq!(rejected.outcome(), Outcome::Rejected);
        assert!(rejected.is_terminal());
    }

    #[test]
    fn test_unknown_decision_deserializes_as_unrecognized() {
        let decision: ApprovalDecision = serde_json::from_str("\"escalate\"").unwrap();
        assert_eq!(decision, ApprovalDecision::Unrecognized);
        assert_eq!(
            "maybe".parse::<ApprovalDecision>().unwrap(),
            ApprovalDecision::Unrecognized
        );
        assert_eq!(
            " Approve ".parse::<ApprovalDecision>().unwrap(),
            ApprovalDecision::Approve
        );
    }
}
