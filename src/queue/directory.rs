//! Directory-backed queue
//!
//! Each message is one `<id>.json` file. Ids start with a zero-padded
//! millisecond timestamp and a per-process sequence number, so a directory
//! listing sorted by name is FIFO.
//! Writes go to a dot-prefixed temp file first and are renamed into place,
//! so readers never observe a half-written message.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{MessageQueue, QueueMessage};
use crate::{Error, Result};

/// How often an empty directory is re-scanned during a long poll
const SCAN_INTERVAL: Duration = Duration::from_millis(250);

/// Orders sends that land in the same millisecond
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Queue stored as files in a directory, usable across processes
pub struct DirQueue {
    name: String,
    dir: PathBuf,
}

impl DirQueue {
    /// Open (creating if needed) the queue `name` under `base`
    pub fn open(base: &Path, name: &str) -> Result<Self> {
        let dir = base.join(name);
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::Queue(format!("Failed to create queue directory {:?}: {}", dir, e))
        })?;

        Ok(Self {
            name: name.to_string(),
            dir,
        })
    }

    /// Directory holding the message files
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn message_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Ids of all visible messages, oldest first
    async fn list_ids(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::Queue(format!("Failed to read queue {}: {}", self.name, e)))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with('.') {
                continue;
            }
            if let Some(id) = file_name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Read up to `limit` visible messages. Files deleted by another
    /// consumer between listing and reading are skipped.
    async fn read_messages(&self, limit: usize) -> Result<Vec<QueueMessage>> {
        let mut messages = Vec::new();

        for id in self.list_ids().await? {
            if messages.len() >= limit {
                break;
            }
            match tokio::fs::read_to_string(self.message_path(&id)).await {
                Ok(body) => messages.push(QueueMessage { id, body }),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("Message {} vanished before it could be read", id);
                }
                Err(e) => {
                    warn!("Failed to read message {} from {}: {}", id, self.name, e);
                }
            }
        }

        Ok(messages)
    }
}

#[async_trait]
impl MessageQueue for DirQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: String) -> Result<String> {
        let id = format!(
            "{:013}-{:010}-{}",
            Utc::now().timestamp_millis(),
            SEQUENCE.fetch_add(1, Ordering::Relaxed),
            Uuid::new_v4()
        );
        let tmp = self.dir.join(format!(".{}.tmp", id));

        tokio::fs::write(&tmp, body.as_bytes())
            .await
            .map_err(|e| Error::Queue(format!("Failed to write message to {}: {}", self.name, e)))?;
        tokio::fs::rename(&tmp, self.message_path(&id))
            .await
            .map_err(|e| Error::Queue(format!("Failed to publish message on {}: {}", self.name, e)))?;

        debug!("Enqueued {} on {}", id, self.name);
        Ok(id)
    }

    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<QueueMessage>> {
        let deadline = Instant::now() + wait;

        loop {
            let messages = self.read_messages(max_messages.max(1)).await?;
            if !messages.is_empty() {
                return Ok(messages);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(SCAN_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.message_path(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Queue(format!(
                "Failed to delete message {} from {}: {}",
                id, self.name, e
            ))),
        }
    }

    async fn peek(&self) -> Result<Vec<QueueMessage>> {
        self.read_messages(usize::MAX).await
    }
}
