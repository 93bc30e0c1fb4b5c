use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

use super::transport::GroupTransport;
use super::types::{
    Channel, InboundMessage, MemberId, MemberView, MembershipChange, MembershipEvent,
    TransportError,
};

const EVENT_CAPACITY: usize = 256;

/// In-process group. Every transport created from the same network sees the others.
///
/// Used for the single-node fallback and for exercising multi-member behavior in tests.
#[derive(Default)]
pub struct LoopbackNetwork {
    endpoints: DashMap<MemberId, Endpoint>,
}

#[derive(Clone)]
struct Endpoint {
    arbiter: bool,
    membership_tx: broadcast::Sender<MembershipEvent>,
    message_tx: broadcast::Sender<InboundMessage>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transport(self: &Arc<Self>, name: impl Into<MemberId>, arbiter: bool) -> LoopbackTransport {
        let (membership_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (message_tx, _) = broadcast::channel(EVENT_CAPACITY);

        LoopbackTransport {
            network: self.clone(),
            name: name.into(),
            arbiter,
            joined: AtomicBool::new(false),
            endpoint: Endpoint {
                arbiter,
                membership_tx,
                message_tx,
            },
        }
    }

    /// Detaches a member without notifying anyone, like a process that died
    /// before the failure detector noticed.
    pub fn crash(&self, member: &MemberId) {
        self.endpoints.remove(member);
    }

    /// Reports `member` as departed to every remaining endpoint.
    pub fn declare_dead(&self, member: &MemberId) {
        let arbiter = self.endpoints.remove(member).map(|(_, e)| e.arbiter).unwrap_or(false);
        self.notify_all(member, arbiter, MembershipChange::Left);
    }

    fn notify_all(&self, member: &MemberId, arbiter: bool, change: MembershipChange) {
        for entry in self.endpoints.iter() {
            if entry.key() == member {
                continue;
            }

            let _ = entry.value().membership_tx.send(MembershipEvent {
                member: member.clone(),
                arbiter,
                change,
            });
        }
    }
}

pub struct LoopbackTransport {
    network: Arc<LoopbackNetwork>,
    name: MemberId,
    arbiter: bool,
    joined: AtomicBool,
    endpoint: Endpoint,
}

impl LoopbackTransport {
    fn attached(&self) -> bool {
        self.joined.load(Ordering::SeqCst) && self.network.endpoints.contains_key(&self.name)
    }
}

#[async_trait]
impl GroupTransport for LoopbackTransport {
    fn member_name(&self) -> &MemberId {
        &self.name
    }

    fn is_arbiter(&self) -> bool {
        self.arbiter
    }

    fn is_joined(&self) -> bool {
        self.joined.load(Ordering::SeqCst)
    }

    async fn join(&self) -> Result<(), TransportError> {
        if self.joined.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.network
            .endpoints
            .insert(self.name.clone(), self.endpoint.clone());
        self.network
            .notify_all(&self.name, self.arbiter, MembershipChange::Joined);

        Ok(())
    }

    async fn leave(&self) {
        if !self.joined.swap(false, Ordering::SeqCst) {
            return;
        }

        if self.network.endpoints.remove(&self.name).is_some() {
            self.network
                .notify_all(&self.name, self.arbiter, MembershipChange::Left);
        }
    }

    fn members(&self) -> Vec<MemberView> {
        if !self.attached() {
            return Vec::new();
        }

        let mut members: Vec<MemberView> = self
            .network
            .endpoints
            .iter()
            .map(|entry| MemberView {
                id: entry.key().clone(),
                arbiter: entry.value().arbiter,
            })
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    async fn broadcast(&self, channel: Channel, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.attached() {
            return Err(TransportError::NotJoined);
        }

        let peers: Vec<Endpoint> = self
            .network
            .endpoints
            .iter()
            .filter(|entry| *entry.key() != self.name)
            .map(|entry| entry.value().clone())
            .collect();

        for peer in peers {
            let _ = peer.message_tx.send(InboundMessage {
                from: self.name.clone(),
                channel,
                payload: payload.clone(),
            });
        }

        Ok(())
    }

    async fn send_to(
        &self,
        target: &MemberId,
        channel: Channel,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        if !self.attached() {
            return Err(TransportError::NotJoined);
        }

        let peer = self
            .network
            .endpoints
            .get(target)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::UnknownMember(target.clone()))?;

        let _ = peer.message_tx.send(InboundMessage {
            from: self.name.clone(),
            channel,
            payload,
        });

        Ok(())
    }

    fn subscribe_membership(&self) -> broadcast::Receiver<MembershipEvent> {
        self.endpoint.membership_tx.subscribe()
    }

    fn subscribe_messages(&self) -> broadcast::Receiver<InboundMessage> {
        self.endpoint.message_tx.subscribe()
    }
}
