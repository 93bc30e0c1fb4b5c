//! Cancellation Request/Response
//!
//! Routes a "cancel the job on host X" request either to the local transcoder
//! or, over the `Rpc` channel, to the member named X. Remote requests are
//! correlated by a request id and bounded by a timeout; every failure mode
//! collapses to `false`.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::protocol::RpcMessage;
use crate::membership::service::MembershipService;
use crate::membership::types::{Channel, InboundMessage, MemberId};
use crate::transcode::service::TranscodingService;

/// Host names that always mean "this node".
const LOCAL_ALIASES: [&str; 2] = ["", "localhost"];

pub struct CancellationHandler {
    membership: Arc<MembershipService>,
    transcoder: Arc<dyn TranscodingService>,
    pending: DashMap<Uuid, oneshot::Sender<bool>>,
    timeout: Duration,
}

impl CancellationHandler {
    pub fn new(
        membership: Arc<MembershipService>,
        transcoder: Arc<dyn TranscodingService>,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            membership,
            transcoder,
            pending: DashMap::new(),
            timeout,
        })
    }

    fn is_local(&self, hostname: &str) -> bool {
        LOCAL_ALIASES.contains(&hostname)
            || hostname == self.membership.member_name().as_str()
    }

    /// Cancels the job running on `hostname`. True iff the job is known to have stopped
    /// (or nothing was running there).
    pub async fn cancel_task(&self, hostname: &str) -> bool {
        let hostname = hostname.trim();
        if self.is_local(hostname) {
            return self.cancel_locally().await;
        }

        let target = MemberId::from(hostname);
        if !self.membership.contains(&target) {
            tracing::warn!("Cannot cancel task on {}: no such member", target);
            return false;
        }

        self.cancel_remote(target).await
    }

    async fn cancel_locally(&self) -> bool {
        let cancelled = self.transcoder.cancel_transcode().await;
        tracing::info!("Local cancel request: {}", if cancelled { "stopped" } else { "failed" });
        cancelled
    }

    async fn cancel_remote(&self, target: MemberId) -> bool {
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);

        let request = RpcMessage::CancelRequest {
            request_id,
            target: target.clone(),
        };
        let sent = match request.encode() {
            Ok(payload) => self
                .membership
                .send_to(&target, Channel::Rpc, payload)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        if let Err(e) = sent {
            tracing::warn!("Failed to send cancel request to {}: {}", target, e);
            self.pending.remove(&request_id);
            return false;
        }

        tracing::debug!("Sent cancel request {} to {}", request_id, target);
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(cancelled)) => cancelled,
            Ok(Err(_)) => false,
            Err(_) => {
                tracing::warn!("Cancel request to {} timed out after {:?}", target, self.timeout);
                self.pending.remove(&request_id);
                false
            }
        }
    }

    /// Handles one `Rpc` channel message.
    pub async fn handle(&self, message: InboundMessage) {
        let decoded = match RpcMessage::decode(&message.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!("Dropping malformed rpc message from {}: {}", message.from, e);
                return;
            }
        };

        match decoded {
            RpcMessage::CancelRequest { request_id, target } => {
                let cancelled = if target == *self.membership.member_name() {
                    self.cancel_locally().await
                } else {
                    tracing::warn!("Cancel request {} addressed to {}, not to us", request_id, target);
                    false
                };

                let response = RpcMessage::CancelResponse {
                    request_id,
                    cancelled,
                };
                match response.encode() {
                    Ok(payload) => {
                        if let Err(e) = self
                            .membership
                            .send_to(&message.from, Channel::Rpc, payload)
                            .await
                        {
                            tracing::warn!("Failed to answer cancel request from {}: {}", message.from, e);
                        }
                    }
                    Err(e) => tracing::error!("Failed to encode cancel response: {}", e),
                }
            }
            RpcMessage::CancelResponse {
                request_id,
                cancelled,
            } => match self.pending.remove(&request_id) {
                Some((_, waiter)) => {
                    let _ = waiter.send(cancelled);
                }
                None => {
                    tracing::debug!("Late or unknown cancel response {}", request_id);
                }
            },
        }
    }

    /// Serves `Rpc` traffic. Each message is handled on its own task so a slow
    /// local cancel never delays responses to our own requests.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let mut messages = self.membership.subscribe_messages();

        tokio::spawn(async move {
            loop {
                match messages.recv().await {
                    Ok(message) if message.channel == Channel::Rpc => {
                        let handler = self.clone();
                        tokio::spawn(async move { handler.handle(message).await });
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Rpc listener lagged by {} messages", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
