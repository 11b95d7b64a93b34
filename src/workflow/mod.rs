//! The approval workflow
//!
//! One fixed graph, run once per question:
//!
//! - **Generate**: ask the generator for a candidate query
//! - **Await approval**: publish the candidate, wait (bounded) for a decision
//! - **Refine**: revise with the approver's feedback, within a budget
//! - **Execute**: run the approved candidate exactly once
//! - **Finalize / Failed**: hand the final state back to the caller
//!
//! ## Example configuration
//!
//! ```toml
//! [approval]
//! timeout = "30m"
//! poll_interval = "20s"
//! max_refinements = 3
//! ```

pub mod engine;
pub mod routing;
pub mod state;

pub use engine::WorkflowEngine;
pub use routing::{route, Route};
pub use state::{ApprovalDecision, Outcome, StateUpdate, WorkflowState};
