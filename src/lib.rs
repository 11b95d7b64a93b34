//! Querygate: human-in-the-loop approval for generated queries
//!
//! A generated query is never executed until a person has looked at it.
//! Each run walks a fixed, bounded graph:
//!
//! ```text
//! ┌──────────┐    ┌────────────────┐  approve   ┌─────────┐
//! │ generate │───▶│ await approval │───────────▶│ execute │──┐
//! └──────────┘    └───────┬────────┘            └─────────┘  │
//!                   ▲     │ refine                            ▼
//!                   │     ▼                               ┌──────────┐
//!                 ┌─┴──────────┐   reject / timeout       │ finalize │
//!                 │   refine   │ ────────────────────────▶└──────────┘
//!                 └────────────┘
//! ```
//!
//! Approval requests and decisions travel over two queues, correlated by the
//! run's `thread_id`. The approver can be a person on the other side of a
//! chat bot, a CLI, or anything else that can read and write those queues.

pub mod approval;
pub mod config;
pub mod notify;
pub mod queue;
pub mod services;
pub mod workflow;

// Re-exports for convenience
pub use approval::{ApprovalAction, ApprovalQueueClient, ApprovalRequest, ApprovalResponse};
pub use config::Config;
pub use workflow::{ApprovalDecision, Outcome, WorkflowEngine, WorkflowState};

/// Crate-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Invalid approval response: {0}")]
    InvalidResponse(String),

    #[error("No pending approval request for {0}")]
    NotPending(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Refinement budget exhausted after {0} refinement(s)")]
    RefinementBudgetExhausted(u32),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
