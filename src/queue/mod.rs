//! Queue transports for approval traffic
//!
//! The approval protocol only needs four primitives from a queue:
//! - `send`: enqueue a message body
//! - `receive`: long-poll for visible messages without removing them
//! - `delete`: acknowledge (remove) one message by id
//! - `peek`: snapshot of everything currently visible
//!
//! `receive` is deliberately non-destructive. A poller that is not the
//! addressee of a message must leave it for its real consumer, so removal
//! only ever happens through an explicit `delete`.

mod directory;
mod memory;

pub use directory::DirQueue;
pub use memory::MemoryQueue;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{QueueConfig, QueueKind};
use crate::Result;

/// A message as seen by a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Transport-assigned id, used to acknowledge the message
    pub id: String,
    /// Raw message body (JSON for approval traffic)
    pub body: String,
}

/// Trait for queue transports
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Queue name
    fn name(&self) -> &str;

    /// Enqueue a message, returning its id
    async fn send(&self, body: String) -> Result<String>;

    /// Wait up to `wait` for at least one visible message and return up to
    /// `max_messages` of them, oldest first. Returns an empty batch when the
    /// wait elapses.
    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<QueueMessage>>;

    /// Remove a message. Returns `false` if it was already gone.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Snapshot of all visible messages, oldest first
    async fn peek(&self) -> Result<Vec<QueueMessage>>;
}

/// The outbound (request) and inbound (response) queues of one deployment
#[derive(Clone)]
pub struct QueuePair {
    pub requests: Arc<dyn MessageQueue>,
    pub responses: Arc<dyn MessageQueue>,
}

impl QueuePair {
    /// Two fresh in-process queues
    pub fn in_memory() -> Self {
        Self {
            requests: Arc::new(MemoryQueue::new("approval-requests")),
            responses: Arc::new(MemoryQueue::new("approval-responses")),
        }
    }
}

/// Open the queue pair described by the configuration
pub fn open_queues(config: &QueueConfig) -> Result<QueuePair> {
    match config.kind {
        QueueKind::Memory => Ok(QueuePair {
            requests: Arc::new(MemoryQueue::new(&config.request_queue)),
            responses: Arc::new(MemoryQueue::new(&config.response_queue)),
        }),
        QueueKind::Directory => {
            let base = config.directory();
            Ok(QueuePair {
                requests: Arc::new(DirQueue::open(&base, &config.request_queue)?),
                responses: Arc::new(DirQueue::open(&base, &config.response_queue)?),
            })
        }
    }
}
