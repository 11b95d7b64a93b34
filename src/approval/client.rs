//! Request/response exchange over the approval queues

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::messages::{ApprovalAction, ApprovalRequest, ApprovalResponse};
use crate::queue::{MessageQueue, QueueMessage, QueuePair};
use crate::{Error, Result};

/// What a polled message means to one waiting run
#[derive(Debug)]
enum Inspection {
    /// Well-formed and addressed to us for the current round
    Accept(ApprovalResponse),
    /// Addressed to another run; must stay in the queue
    Foreign,
    /// Addressed to us but answering an older (or unknown) round
    Stale(u32),
    /// Not a valid response at all
    Malformed(Error),
}

fn inspect(message: &QueueMessage, thread_id: &str, round: Option<u32>) -> Inspection {
    let response = match ApprovalResponse::parse(&message.body) {
        Ok(response) => response,
        Err(e) => return Inspection::Malformed(e),
    };

    if response.thread_id != thread_id {
        return Inspection::Foreign;
    }

    match (round, response.round) {
        (Some(expected), Some(answered)) if expected != answered => Inspection::Stale(answered),
        _ => Inspection::Accept(response),
    }
}

/// Client for the two-queue approval protocol.
///
/// Built once per process and shared (`Arc`) by every run; it holds no
/// per-run state.
pub struct ApprovalQueueClient {
    requests: Arc<dyn MessageQueue>,
    responses: Arc<dyn MessageQueue>,
}

impl ApprovalQueueClient {
    pub fn new(queues: QueuePair) -> Self {
        Self {
            requests: queues.requests,
            responses: queues.responses,
        }
    }

    /// Enqueue a request for review. Failures are reported, never retried.
    pub async fn send_request(&self, request: &ApprovalRequest) -> Result<()> {
        let body = serde_json::to_string(request)?;
        let id = self.requests.send(body).await?;
        info!(
            "Approval request {} sent for {} (round {})",
            id, request.thread_id, request.round
        );
        Ok(())
    }

    /// Wait for the decision on `thread_id`.
    ///
    /// Returns the first well-formed response addressed to this run, after
    /// removing it from the queue, or `None` once `timeout` has elapsed.
    /// Responses for other runs are left in place. Malformed responses, and
    /// responses pinned to a round other than `round`, are removed and
    /// polling continues. Blocks for at most `timeout` plus one
    /// `poll_interval`.
    pub async fn poll_for_response(
        &self,
        thread_id: &str,
        round: Option<u32>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Option<ApprovalResponse> {
        let deadline = Instant::now() + timeout;
        debug!(
            "Polling {} for {} (timeout {:?})",
            self.responses.name(),
            thread_id,
            timeout
        );

        loop {
            let now = Instant::now();
            if now >= deadline {
                info!("No approval for {} within {:?}", thread_id, timeout);
                return None;
            }

            let wait = poll_interval.min(deadline - now);
            let back_off = match self.visible_responses(wait).await {
                Ok(messages) if messages.is_empty() => false,
                Ok(messages) => {
                    for message in messages {
                        if let Some(response) = self.consider(&message, thread_id, round).await {
                            return Some(response);
                        }
                    }
                    true
                }
                Err(e) => {
                    warn!("Receive on {} failed: {}", self.responses.name(), e);
                    true
                }
            };

            // An empty receive already waited out its long poll. Anything
            // else (messages that are not ours, or a failing transport)
            // waits one interval before looking again.
            if back_off {
                let remaining = deadline.saturating_duration_since(Instant::now());
                tokio::time::sleep(poll_interval.min(remaining)).await;
            }
        }
    }

    /// Long-poll until something is visible, then return every visible
    /// response so foreign messages at the head cannot hide ours
    async fn visible_responses(&self, wait: Duration) -> Result<Vec<QueueMessage>> {
        if self.responses.receive(1, wait).await?.is_empty() {
            return Ok(Vec::new());
        }
        self.responses.peek().await
    }

    /// Act on one visible response, returning it if it is ours to take
    async fn consider(
        &self,
        message: &QueueMessage,
        thread_id: &str,
        round: Option<u32>,
    ) -> Option<ApprovalResponse> {
        match inspect(message, thread_id, round) {
            Inspection::Accept(response) => {
                // Only a successful delete makes the response ours;
                // otherwise another consumer already took it
                match self.responses.delete(&message.id).await {
                    Ok(true) => {
                        info!("Received {} for {}", response.action, thread_id);
                        return Some(response);
                    }
                    Ok(false) => debug!("Response {} already consumed", message.id),
                    Err(e) => warn!("Failed to acknowledge response {}: {}", message.id, e),
                }
            }
            Inspection::Foreign => {}
            Inspection::Stale(answered) => {
                warn!(
                    "Discarding stale response {} for {} (round {}, expected {:?})",
                    message.id, thread_id, answered, round
                );
                self.discard(message).await;
            }
            Inspection::Malformed(e) => {
                warn!("Discarding malformed response {}: {}", message.id, e);
                self.discard(message).await;
            }
        }
        None
    }

    /// Approver side: enqueue a decision for `thread_id`
    pub async fn send_response(
        &self,
        thread_id: &str,
        action: ApprovalAction,
        feedback: Option<String>,
    ) -> Result<()> {
        let response = ApprovalResponse::new(thread_id, action, feedback)?;
        self.submit(&response).await
    }

    /// Approver side: enqueue an already-built decision.
    ///
    /// The decision must answer a request that is still pending. A decision
    /// without a round is pinned to the pending request's round, so a
    /// redelivered copy can never answer a later round. Once enqueued, the
    /// request is acknowledged and no longer shows up in
    /// [`list_pending`](Self::list_pending).
    pub async fn submit(&self, response: &ApprovalResponse) -> Result<()> {
        response.validate()?;

        let pending = self.pending_for(&response.thread_id).await?;
        let answered = match response.round {
            Some(round) => pending.iter().find(|(_, r)| r.round == round),
            None => pending.iter().max_by_key(|(_, r)| r.round),
        };
        let round = match answered {
            Some((_, request)) => request.round,
            None => {
                let what = match response.round {
                    Some(round) => format!("{} (round {})", response.thread_id, round),
                    None => response.thread_id.clone(),
                };
                return Err(Error::NotPending(what));
            }
        };

        let pinned = response.clone().with_round(round);
        let body = serde_json::to_string(&pinned)?;
        self.responses.send(body).await?;
        info!(
            "Decision {} sent for {} (round {})",
            pinned.action, pinned.thread_id, round
        );

        for (message, _) in &pending {
            if let Err(e) = self.requests.delete(&message.id).await {
                warn!(
                    "Decision sent but request {} for {} not acknowledged: {}",
                    message.id, pinned.thread_id, e
                );
            }
        }
        Ok(())
    }

    /// Snapshot of requests still waiting for a decision. Never consumes.
    pub async fn list_pending(&self) -> Result<Vec<ApprovalRequest>> {
        let messages = self.requests.peek().await?;
        let mut pending = Vec::with_capacity(messages.len());

        for message in messages {
            match serde_json::from_str::<ApprovalRequest>(&message.body) {
                Ok(request) => pending.push(request),
                Err(e) => warn!("Skipping unreadable request {}: {}", message.id, e),
            }
        }

        Ok(pending)
    }

    /// Remove every pending request of `thread_id`, returning how many went
    pub async fn withdraw_request(&self, thread_id: &str) -> Result<usize> {
        let mut removed = 0;

        for (message, _) in self.pending_for(thread_id).await? {
            if self.requests.delete(&message.id).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("Withdrew {} request(s) for {}", removed, thread_id);
        }
        Ok(removed)
    }

    /// Pending requests of one thread, with the queue messages carrying them
    async fn pending_for(&self, thread_id: &str) -> Result<Vec<(QueueMessage, ApprovalRequest)>> {
        let pending = self
            .requests
            .peek()
            .await?
            .into_iter()
            .filter_map(|message| {
                let request = serde_json::from_str::<ApprovalRequest>(&message.body).ok()?;
                (request.thread_id == thread_id).then_some((message, request))
            })
            .collect();
        Ok(pending)
    }

    async fn discard(&self, message: &QueueMessage) {
        if let Err(e) = self.responses.delete(&message.id).await {
            warn!("Failed to discard response {}: {}", message.id, e);
        }
    }
}
