//! In-process queue

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::{MessageQueue, QueueMessage};
use crate::Result;

/// Queue held in memory, shared between tasks of one process
pub struct MemoryQueue {
    name: String,
    messages: Mutex<VecDeque<QueueMessage>>,
    arrived: Notify,
}

impl MemoryQueue {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            messages: Mutex::new(VecDeque::new()),
            arrived: Notify::new(),
        }
    }

    /// Number of visible messages
    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: String) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.messages.lock().await.push_back(QueueMessage {
            id: id.clone(),
            body,
        });
        debug!("Enqueued {} on {}", id, self.name);
        self.arrived.notify_waiters();
        Ok(id)
    }

    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<QueueMessage>> {
        let deadline = Instant::now() + wait;

        loop {
            // Register interest before looking, so a send between the check
            // and the wait is not missed
            let notified = self.arrived.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let messages = self.messages.lock().await;
                if !messages.is_empty() {
                    return Ok(messages
                        .iter()
                        .take(max_messages.max(1))
                        .cloned()
                        .collect());
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut messages = self.messages.lock().await;
        match messages.iter().position(|m| m.id == id) {
            Some(index) => {
                messages.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn peek(&self) -> Result<Vec<QueueMessage>> {
        Ok(self.messages.lock().await.iter().cloned().collect())
    }
}
