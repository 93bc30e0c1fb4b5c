use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

use super::loopback::LoopbackNetwork;
use super::transport::GroupTransport;
use super::types::{
    Channel, InboundMessage, MemberId, MemberView, MembershipEvent, TransportError,
};

/// Group membership for one node.
///
/// Wraps a [`GroupTransport`] and falls back to a private single-member group
/// when the transport cannot join. The fallback runs under the configured name,
/// so the rest of the node cannot tell the difference apart from `member_count() == 1`.
pub struct MembershipService {
    primary: Arc<dyn GroupTransport>,
    active: RwLock<Option<Arc<dyn GroupTransport>>>,
    degraded: RwLock<bool>,
    idle_membership: broadcast::Sender<MembershipEvent>,
    idle_messages: broadcast::Sender<InboundMessage>,
}

impl MembershipService {
    pub fn new(transport: Arc<dyn GroupTransport>) -> Arc<Self> {
        let (idle_membership, _) = broadcast::channel(1);
        let (idle_messages, _) = broadcast::channel(1);

        Arc::new(Self {
            primary: transport,
            active: RwLock::new(None),
            degraded: RwLock::new(false),
            idle_membership,
            idle_messages,
        })
    }

    fn active(&self) -> Option<Arc<dyn GroupTransport>> {
        self.active.read().ok().and_then(|slot| slot.clone())
    }

    fn set_active(&self, transport: Option<Arc<dyn GroupTransport>>) {
        if let Ok(mut slot) = self.active.write() {
            *slot = transport;
        }
    }

    /// Joins the group. Never fails: a transport error degrades to single-node mode.
    pub async fn join(&self) {
        if self.active().is_some() {
            tracing::debug!("Already joined");
            return;
        }

        match self.primary.join().await {
            Ok(()) => {
                self.set_active(Some(self.primary.clone()));
                tracing::info!(
                    "Joined cluster as {} ({} member(s))",
                    self.primary.member_name(),
                    self.member_count()
                );
            }
            Err(e) => {
                tracing::warn!("Could not join cluster: {}. Running in single-node mode", e);

                let solo: Arc<dyn GroupTransport> = Arc::new(
                    LoopbackNetwork::new()
                        .transport(self.primary.member_name().clone(), self.primary.is_arbiter()),
                );
                if let Err(e) = solo.join().await {
                    tracing::error!("Single-node fallback failed to start: {}", e);
                    return;
                }

                if let Ok(mut degraded) = self.degraded.write() {
                    *degraded = true;
                }
                self.set_active(Some(solo));
            }
        }
    }

    /// Idempotent.
    pub async fn leave(&self) {
        let Some(transport) = self.active() else {
            return;
        };

        transport.leave().await;
        self.set_active(None);
        tracing::info!("Left cluster");
    }

    pub fn is_joined(&self) -> bool {
        self.active().is_some()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.read().map(|d| *d).unwrap_or(false)
    }

    /// 0 when not joined.
    pub fn member_count(&self) -> usize {
        self.members().len()
    }

    pub fn members(&self) -> Vec<MemberView> {
        self.active().map(|t| t.members()).unwrap_or_default()
    }

    pub fn contains(&self, member: &MemberId) -> bool {
        self.members().iter().any(|m| m.id == *member)
    }

    /// Configured name, available before joining.
    pub fn member_name(&self) -> &MemberId {
        self.primary.member_name()
    }

    /// Local identity; `None` while not joined.
    pub fn local_identity(&self) -> Option<MemberId> {
        self.active().map(|t| t.member_name().clone())
    }

    pub fn is_arbiter(&self) -> bool {
        self.primary.is_arbiter()
    }

    pub async fn broadcast(&self, channel: Channel, payload: Vec<u8>) -> Result<(), TransportError> {
        let transport = self.active().ok_or(TransportError::NotJoined)?;
        transport.broadcast(channel, payload).await
    }

    pub async fn send_to(
        &self,
        target: &MemberId,
        channel: Channel,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let transport = self.active().ok_or(TransportError::NotJoined)?;
        transport.send_to(target, channel, payload).await
    }

    /// Subscribe after `join`; before that the receiver never yields.
    pub fn subscribe_membership(&self) -> broadcast::Receiver<MembershipEvent> {
        match self.active() {
            Some(transport) => transport.subscribe_membership(),
            None => self.idle_membership.subscribe(),
        }
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<InboundMessage> {
        match self.active() {
            Some(transport) => transport.subscribe_messages(),
            None => self.idle_messages.subscribe(),
        }
    }
}
