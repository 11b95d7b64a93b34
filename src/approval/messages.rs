//! Wire messages exchanged with the approver

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// How sure the generator is about a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Default for Confidence {
    fn default() -> Self {
        Confidence::Low
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        };
        f.write_str(s)
    }
}

/// Outbound request asking a human to review a candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Run this request belongs to
    pub thread_id: String,
    /// Candidate query
    pub artifact: String,
    /// Generator's explanation of the candidate
    pub explanation: String,
    /// Generator's confidence
    pub confidence: Confidence,
    /// Tables/entities the candidate touches
    #[serde(default)]
    pub referenced_entities: Vec<String>,
    /// Refinement count at send time
    pub round: u32,
}

impl ApprovalRequest {
    /// One-line summary for listings and notifications
    pub fn summary(&self) -> String {
        let first_line = self.artifact.lines().next().unwrap_or_default();
        format!(
            "{} (round {}, {} confidence): {}",
            self.thread_id, self.round, self.confidence, first_line
        )
    }
}

/// What the approver decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalAction {
    /// Execute the candidate as is
    Approve,
    /// Revise the candidate using the attached feedback
    Refine,
    /// Drop the candidate, do not execute
    Reject,
}

impl fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalAction::Approve => "approve",
            ApprovalAction::Refine => "refine",
            ApprovalAction::Reject => "reject",
        };
        f.write_str(s)
    }
}

impl FromStr for ApprovalAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "approve" | "approved" | "a" | "y" | "yes" => Ok(ApprovalAction::Approve),
            "refine" | "revise" | "e" | "edit" => Ok(ApprovalAction::Refine),
            "reject" | "rejected" | "r" | "n" | "no" => Ok(ApprovalAction::Reject),
            other => Err(Error::InvalidResponse(format!("Unknown action: {}", other))),
        }
    }
}

/// Inbound decision from the approver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    /// Run this decision is addressed to
    pub thread_id: String,
    /// The decision
    pub action: ApprovalAction,
    /// Refinement instructions, required iff `action` is `refine`
    #[serde(default)]
    pub feedback: Option<String>,
    /// Round this decision answers, if the approver knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
}

impl ApprovalResponse {
    /// Build a validated response. Blank feedback counts as no feedback.
    pub fn new(thread_id: &str, action: ApprovalAction, feedback: Option<String>) -> Result<Self> {
        let response = Self {
            thread_id: thread_id.to_string(),
            action,
            feedback,
            round: None,
        }
        .normalized();
        response.validate()?;
        Ok(response)
    }

    /// Pin the response to a specific round
    pub fn with_round(mut self, round: u32) -> Self {
        self.round = Some(round);
        self
    }

    /// Parse and validate a message body
    pub fn parse(body: &str) -> Result<Self> {
        let response: Self = serde_json::from_str(body)
            .map_err(|e| Error::InvalidResponse(format!("Unparseable response: {}", e)))?;
        let response = response.normalized();
        response.validate()?;
        Ok(response)
    }

    /// Check the feedback rule and the correlation key
    pub fn validate(&self) -> Result<()> {
        if self.thread_id.trim().is_empty() {
            return Err(Error::InvalidResponse("Missing thread_id".to_string()));
        }

        match (self.action, self.feedback.as_deref()) {
            (ApprovalAction::Refine, None) => Err(Error::InvalidResponse(
                "Refine requires non-empty feedback".to_string(),
            )),
            (ApprovalAction::Approve | ApprovalAction::Reject, Some(_)) => {
                Err(Error::InvalidResponse(format!(
                    "Feedback is only allowed with refine, not {}",
                    self.action
                )))
            }
            _ => Ok(()),
        }
    }

    fn normalized(mut self) -> Self {
        self.feedback = self
            .feedback
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());
        self
    }
}
