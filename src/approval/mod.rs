//! Approval protocol
//!
//! Two logical queues carry the exchange between a run and its approver:
//! requests flow out, decisions flow back in. Every message carries the
//! run's `thread_id`, which is the only thing tying a decision to its run.

mod client;
mod messages;

pub use client::ApprovalQueueClient;
pub use messages::{ApprovalAction, ApprovalRequest, ApprovalResponse, Confidence};
