//! Status broadcasts
//!
//! Notifications are fire-and-forget: they tell people what the workflow is
//! doing, but the workflow never waits on them or fails because of them.
//!
//! Supported notifiers:
//! - Slack webhook
//! - Log output (default, and for testing)

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::approval::ApprovalRequest;
use crate::config::NotificationConfig;
use crate::workflow::{Outcome, WorkflowState};
use crate::{Error, Result};

/// Longest artifact excerpt included in a notification
const PREVIEW_CHARS: usize = 500;

/// What the notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A candidate is waiting for review
    ApprovalRequested,
    /// A run reached a terminal state
    RunFinished,
}

/// A status update for humans
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub thread_id: String,
    pub title: String,
    pub summary: Option<String>,
    /// Artifact excerpt
    pub preview: Option<String>,
}

impl Notification {
    /// Announce a request waiting for review
    pub fn approval_requested(request: &ApprovalRequest) -> Self {
        Self {
            kind: NotificationKind::ApprovalRequested,
            thread_id: request.thread_id.clone(),
            title: format!(
                "Approval needed: {} (round {})",
                request.thread_id, request.round
            ),
            summary: Some(format!(
                "{}\nConfidence: {}",
                request.explanation, request.confidence
            )),
            preview: Some(preview(&request.artifact)),
        }
    }

    /// Announce the outcome of a run
    pub fn run_finished(state: &WorkflowState) -> Self {
        let outcome = state.outcome();
        Self {
            kind: NotificationKind::RunFinished,
            thread_id: state.thread_id.clone(),
            title: format!("Run {}: {}", state.thread_id, outcome),
            summary: match outcome {
                Outcome::Failed(reason) | Outcome::ExecutionFailed(reason) => Some(reason),
                _ => None,
            },
            preview: state.artifact.as_deref().map(preview),
        }
    }

    /// Plain text rendering
    pub fn format_text(&self) -> String {
        let mut msg = self.title.clone();
        if let Some(summary) = &self.summary {
            msg.push_str(&format!("\n{}", summary));
        }
        if let Some(preview) = &self.preview {
            msg.push_str(&format!("\n\n{}", preview));
        }
        msg
    }

    /// Slack block-kit payload
    pub fn format_slack(&self) -> serde_json::Value {
        let mut blocks = vec![serde_json::json!({
            "type": "header",
            "text": { "type": "plain_text", "text": self.title }
        })];

        if let Some(summary) = &self.summary {
            blocks.push(serde_json::json!({
                "type": "section",
                "text": { "type": "mrkdwn", "text": summary }
            }));
        }

        if let Some(preview) = &self.preview {
            blocks.push(serde_json::json!({
                "type": "section",
                "text": { "type": "mrkdwn", "text": format!("```{}```", preview) }
            }));
        }

        if self.kind == NotificationKind::ApprovalRequested {
            blocks.push(serde_json::json!({
                "type": "context",
                "elements": [{
                    "type": "mrkdwn",
                    "text": format!("Reply with `querygate respond {} approve|refine|reject`", self.thread_id)
                }]
            }));
        }

        serde_json::json!({ "text": self.title, "blocks": blocks })
    }
}

fn preview(artifact: &str) -> String {
    if artifact.chars().count() > PREVIEW_CHARS {
        let cut: String = artifact.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        artifact.to_string()
    }
}

/// Trait for notifiers
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notifier name
    fn name(&self) -> &str;

    /// Deliver a notification
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Log notifier
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        info!("📬 {}", notification.title);
        if let Some(summary) = &notification.summary {
            debug!("Summary: {}", summary);
        }
        Ok(())
    }
}

/// Slack webhook notifier
pub struct SlackNotifier {
    webhook_url: String,
    channel: Option<String>,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String, channel: Option<String>) -> Self {
        Self {
            webhook_url,
            channel,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &NotificationConfig) -> Option<Self> {
        match config {
            NotificationConfig::Slack {
                webhook_url,
                channel,
            } => Some(Self::new(
                crate::config::resolve_env(webhook_url),
                channel.as_deref().map(crate::config::resolve_env),
            )),
            _ => None,
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &str {
        "slack"
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        let mut payload = notification.format_slack();

        if let Some(channel) = &self.channel {
            payload["channel"] = serde_json::json!(channel);
        }

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("Slack send failed: {}", e)))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notification(format!("Slack error: {}", body)));
        }

        debug!("Slack notification sent");
        Ok(())
    }
}

/// Fan-out over several notifiers. Every notifier is tried; the first
/// failure (if any) is reported after all have run.
pub struct Broadcast {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl Broadcast {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for Broadcast {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        let results = join_all(self.notifiers.iter().map(|n| n.notify(notification))).await;

        let mut first_error = None;
        for (notifier, result) in self.notifiers.iter().zip(results) {
            if let Err(e) = result {
                warn!("Notifier {} failed: {}", notifier.name(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Build the enabled notifiers from configuration. Unknown names are
/// skipped with a warning; with nothing enabled, a log notifier is used.
pub fn create_notifiers(
    configs: &HashMap<String, NotificationConfig>,
    enabled: &[String],
) -> Broadcast {
    let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();

    for name in enabled {
        match configs.get(name) {
            Some(config @ NotificationConfig::Slack { .. }) => {
                if let Some(slack) = SlackNotifier::from_config(config) {
                    notifiers.push(Box::new(slack));
                }
            }
            Some(NotificationConfig::Log) => notifiers.push(Box::new(LogNotifier)),
            None => warn!("Notifier {} enabled but not configured", name),
        }
    }

    if notifiers.is_empty() {
        notifiers.push(Box::new(LogNotifier));
    }

    Broadcast::new(notifiers)
}
