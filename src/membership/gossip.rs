use async_trait::async_trait;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::transport::GroupTransport;
use super::types::{
    Channel, Frame, GossipMessage, InboundMessage, Member, MemberId, MemberState, MemberView,
    MembershipChange, MembershipEvent, TransportError,
};

const GOSSIP_INTERVAL: Duration = Duration::from_millis(500);
const GOSSIP_FANOUT: usize = 3;
const FAILURE_DETECTION_INTERVAL: Duration = Duration::from_secs(2);
const SUSPECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEAD_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_DATAGRAM: usize = 65_507;
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct GossipSettings {
    pub group: String,
    pub member_name: MemberId,
    pub bind_addr: SocketAddr,
    pub seeds: Vec<SocketAddr>,
    pub arbiter: bool,
    pub discovery_window: Duration,
}

/// UDP gossip transport (SWIM-like).
///
/// Members ping a few random peers every [`GOSSIP_INTERVAL`], exchange member
/// lists in acks and walk silent peers through `Alive -> Suspect -> Dead`.
/// A member reaching `Dead` or sending `Leave` is reported as [`MembershipChange::Left`].
pub struct GossipTransport {
    inner: Arc<GossipInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct GossipInner {
    settings: GossipSettings,
    members: DashMap<MemberId, Member>,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    incarnation: AtomicU64,
    membership_tx: broadcast::Sender<MembershipEvent>,
    message_tx: broadcast::Sender<InboundMessage>,
}

impl GossipTransport {
    pub fn new(settings: GossipSettings) -> Self {
        let (membership_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (message_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(GossipInner {
                settings,
                members: DashMap::new(),
                socket: RwLock::new(None),
                incarnation: AtomicU64::new(0),
                membership_tx,
                message_tx,
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Address the socket is actually bound to, once joined.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.socket().and_then(|s| s.local_addr().ok())
    }

    fn spawn_loops(&self, socket: Arc<UdpSocket>) {
        let gossip = {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.gossip_loop().await })
        };

        let receive = {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.receive_loop(socket).await })
        };

        let failure_detection = {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.failure_detection_loop().await })
        };

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.extend([gossip, receive, failure_detection]);
        }
    }
}

#[async_trait]
impl GroupTransport for GossipTransport {
    fn member_name(&self) -> &MemberId {
        &self.inner.settings.member_name
    }

    fn is_arbiter(&self) -> bool {
        self.inner.settings.arbiter
    }

    fn is_joined(&self) -> bool {
        self.inner.socket().is_some()
    }

    async fn join(&self) -> Result<(), TransportError> {
        if self.is_joined() {
            return Ok(());
        }

        let settings = &self.inner.settings;
        let socket = UdpSocket::bind(settings.bind_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: settings.bind_addr,
                source,
            })?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let incarnation = self.inner.incarnation.fetch_add(1, Ordering::SeqCst) + 1;
        let local = Member {
            id: settings.member_name.clone(),
            addr: local_addr,
            state: MemberState::Alive,
            incarnation,
            arbiter: settings.arbiter,
            last_seen: Some(Instant::now()),
        };

        self.inner.members.clear();
        self.inner.members.insert(local.id.clone(), local.clone());
        if let Ok(mut slot) = self.inner.socket.write() {
            *slot = Some(socket.clone());
        }

        let mut discovered = self.inner.membership_tx.subscribe();
        self.spawn_loops(socket);

        tracing::info!(
            "Joined group '{}' as {} on {}",
            settings.group,
            local.id,
            local_addr
        );

        let seeds: Vec<SocketAddr> = settings
            .seeds
            .iter()
            .copied()
            .filter(|seed| *seed != local_addr)
            .collect();

        if seeds.is_empty() {
            return Ok(());
        }

        tracing::info!("Discovering group via {} seed(s)", seeds.len());
        for seed in &seeds {
            let msg = GossipMessage::Join {
                member: local.clone(),
            };

            if let Err(e) = self.inner.send_frame(msg, *seed).await {
                tracing::warn!("Failed to send join request to {}: {}", seed, e);
            }
        }

        let answered = tokio::time::timeout(settings.discovery_window, async {
            loop {
                match discovered.recv().await {
                    Ok(event) if event.change == MembershipChange::Joined => return true,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => return true,
                    Err(broadcast::error::RecvError::Closed) => return false,
                }
            }
        })
        .await
        .unwrap_or(false);

        if !answered {
            tracing::info!(
                "No member answered within {:?}, continuing as sole member",
                settings.discovery_window
            );
        }

        Ok(())
    }

    async fn leave(&self) {
        let Some(socket) = self.inner.socket() else {
            return;
        };

        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }

        let msg = GossipMessage::Leave {
            member_id: self.inner.settings.member_name.clone(),
        };
        self.inner.broadcast_message(&socket, msg).await;

        if let Ok(mut slot) = self.inner.socket.write() {
            *slot = None;
        }
        self.inner.members.clear();

        tracing::info!("Left group '{}'", self.inner.settings.group);
    }

    fn members(&self) -> Vec<MemberView> {
        if !self.is_joined() {
            return Vec::new();
        }

        let mut members: Vec<MemberView> = self
            .inner
            .members
            .iter()
            .filter(|entry| entry.value().state != MemberState::Dead)
            .map(|entry| MemberView {
                id: entry.value().id.clone(),
                arbiter: entry.value().arbiter,
            })
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    async fn broadcast(&self, channel: Channel, payload: Vec<u8>) -> Result<(), TransportError> {
        let socket = self.inner.socket().ok_or(TransportError::NotJoined)?;
        let msg = GossipMessage::Data {
            from: self.inner.settings.member_name.clone(),
            channel,
            payload,
        };

        self.inner.broadcast_message(&socket, msg).await;
        Ok(())
    }

    async fn send_to(
        &self,
        target: &MemberId,
        channel: Channel,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let addr = self
            .inner
            .members
            .get(target)
            .filter(|m| m.state != MemberState::Dead)
            .map(|m| m.addr)
            .ok_or_else(|| TransportError::UnknownMember(target.clone()))?;

        let msg = GossipMessage::Data {
            from: self.inner.settings.member_name.clone(),
            channel,
            payload,
        };

        self.inner.send_frame(msg, addr).await
    }

    fn subscribe_membership(&self) -> broadcast::Receiver<MembershipEvent> {
        self.inner.membership_tx.subscribe()
    }

    fn subscribe_messages(&self) -> broadcast::Receiver<InboundMessage> {
        self.inner.message_tx.subscribe()
    }
}

impl Drop for GossipTransport {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

impl GossipInner {
    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket.read().ok().and_then(|slot| slot.clone())
    }

    fn local_id(&self) -> &MemberId {
        &self.settings.member_name
    }

    fn encode(&self, message: GossipMessage) -> Result<Vec<u8>, TransportError> {
        let frame = Frame {
            group: self.settings.group.clone(),
            message,
        };

        Ok(bincode::serialize(&frame)?)
    }

    async fn send_frame(&self, message: GossipMessage, addr: SocketAddr) -> Result<(), TransportError> {
        let socket = self.socket().ok_or(TransportError::NotJoined)?;
        let encoded = self.encode(message)?;

        if encoded.len() > MAX_DATAGRAM {
            tracing::error!("Dropping oversized frame ({} bytes) to {}", encoded.len(), addr);
            return Ok(());
        }

        socket.send_to(&encoded, addr).await?;
        Ok(())
    }

    fn emit(&self, member: &Member, change: MembershipChange) {
        tracing::info!("Member {} {:?}", member.id, change);

        let _ = self.membership_tx.send(MembershipEvent {
            member: member.id.clone(),
            arbiter: member.arbiter,
            change,
        });
    }

    fn live_peers(&self) -> Vec<Member> {
        self.members
            .iter()
            .filter(|entry| {
                entry.value().id != *self.local_id() && entry.value().state != MemberState::Dead
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(GOSSIP_INTERVAL);

        loop {
            interval.tick().await;

            let peers = self.live_peers();
            if peers.is_empty() {
                continue;
            }

            let targets: Vec<Member> = peers
                .choose_multiple(&mut rand::thread_rng(), GOSSIP_FANOUT)
                .cloned()
                .collect();
            let incarnation = self.incarnation.load(Ordering::SeqCst);

            for target in targets {
                let msg = GossipMessage::Ping {
                    from: self.local_id().clone(),
                    incarnation,
                    arbiter: self.settings.arbiter,
                };

                if let Err(e) = self.send_frame(msg, target.addr).await {
                    tracing::warn!("Failed to send ping to {}: {}", target.id, e);
                } else {
                    tracing::debug!("Sent ping to {}", target.id);
                }
            }
        }
    }

    async fn receive_loop(self: Arc<Self>, socket: Arc<UdpSocket>) {
        let mut buf = vec![0u8; 65536];

        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<Frame>(&buf[..len]) {
                    Ok(frame) if frame.group == self.settings.group => {
                        if let Err(e) = self.handle_message(frame.message, src).await {
                            tracing::error!("Error handling message from {}: {}", src, e);
                        }
                    }
                    Ok(frame) => {
                        tracing::debug!("Ignoring frame for group '{}' from {}", frame.group, src);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to deserialize frame from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) -> Result<(), TransportError> {
        match msg {
            GossipMessage::Ping {
                from,
                incarnation,
                arbiter,
            } => {
                self.handle_ping(from, incarnation, arbiter, src).await?;
            }

            GossipMessage::Ack {
                from,
                incarnation,
                members,
            } => {
                self.handle_ack(from, incarnation, members, src);
            }

            GossipMessage::Join { member } => {
                self.handle_join(member, src).await?;
            }

            GossipMessage::Leave { member_id } => {
                self.handle_leave(member_id);
            }

            GossipMessage::Suspect {
                member_id,
                incarnation,
            } => {
                self.handle_suspect(member_id, incarnation).await;
            }

            GossipMessage::Alive {
                member_id,
                incarnation,
            } => {
                self.handle_alive(member_id, incarnation);
            }

            GossipMessage::Data {
                from,
                channel,
                payload,
            } => {
                self.touch(&from);
                let _ = self.message_tx.send(InboundMessage {
                    from,
                    channel,
                    payload,
                });
            }
        }

        Ok(())
    }

    /// Direct contact proves liveness.
    fn touch(&self, id: &MemberId) {
        let revived = match self.members.get_mut(id) {
            Some(mut member) => {
                member.last_seen = Some(Instant::now());
                match member.state {
                    MemberState::Suspect => {
                        member.state = MemberState::Alive;
                        None
                    }
                    MemberState::Dead => {
                        member.state = MemberState::Alive;
                        Some(member.clone())
                    }
                    MemberState::Alive => None,
                }
            }
            None => None,
        };

        if let Some(member) = revived {
            self.emit(&member, MembershipChange::Joined);
        }
    }

    async fn handle_ping(
        &self,
        from: MemberId,
        from_incarnation: u64,
        from_arbiter: bool,
        src: SocketAddr,
    ) -> Result<(), TransportError> {
        tracing::debug!("Received ping from {}", from);

        if self.members.contains_key(&from) {
            self.touch(&from);
            if let Some(mut member) = self.members.get_mut(&from) {
                member.incarnation = member.incarnation.max(from_incarnation);
                member.arbiter = from_arbiter;
            }
        } else {
            let discovered = Member {
                id: from.clone(),
                addr: src,
                state: MemberState::Alive,
                incarnation: from_incarnation,
                arbiter: from_arbiter,
                last_seen: Some(Instant::now()),
            };

            self.members.insert(discovered.id.clone(), discovered.clone());
            self.emit(&discovered, MembershipChange::Joined);
        }

        let reply = GossipMessage::Ack {
            from: self.local_id().clone(),
            incarnation: self.incarnation.load(Ordering::SeqCst),
            members: self.known_members(),
        };

        self.send_frame(reply, src).await
    }

    fn known_members(&self) -> Vec<Member> {
        self.members
            .iter()
            .filter(|entry| entry.value().state != MemberState::Dead)
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn handle_ack(&self, from: MemberId, from_incarnation: u64, members: Vec<Member>, src: SocketAddr) {
        tracing::debug!(
            "Received ack from {} (inc={}) with {} members",
            from,
            from_incarnation,
            members.len()
        );

        self.touch(&from);

        for mut member in members {
            if member.id == *self.local_id() {
                continue;
            }
            if member.id == from {
                member.addr = src;
                member.incarnation = member.incarnation.max(from_incarnation);

                // The sender's own entry is authoritative for its role.
                if let Some(mut existing) = self.members.get_mut(&from) {
                    existing.arbiter = member.arbiter;
                }
            }

            self.merge_member(member);
        }
    }

    fn merge_member(&self, incoming: Member) {
        let change = match self.members.get_mut(&incoming.id) {
            Some(mut existing) => {
                let was_live = existing.state != MemberState::Dead;

                if incoming.incarnation > existing.incarnation {
                    tracing::debug!(
                        "Updating {}: inc {} -> {}",
                        incoming.id,
                        existing.incarnation,
                        incoming.incarnation,
                    );

                    existing.state = incoming.state;
                    existing.incarnation = incoming.incarnation;
                    existing.arbiter = incoming.arbiter;
                    existing.last_seen = Some(Instant::now());
                } else if incoming.incarnation == existing.incarnation
                    && incoming.state == MemberState::Alive
                    && existing.state == MemberState::Suspect
                {
                    tracing::info!("{} refuted suspicion", incoming.id);
                    existing.state = MemberState::Alive;
                    existing.last_seen = Some(Instant::now());
                }

                let is_live = existing.state != MemberState::Dead;
                match (was_live, is_live) {
                    (false, true) => Some((existing.clone(), MembershipChange::Joined)),
                    (true, false) => Some((existing.clone(), MembershipChange::Left)),
                    _ => None,
                }
            }
            None if incoming.state != MemberState::Dead => {
                let mut member = incoming;
                member.last_seen = Some(Instant::now());
                self.members.insert(member.id.clone(), member.clone());
                Some((member, MembershipChange::Joined))
            }
            None => None,
        };

        if let Some((member, change)) = change {
            self.emit(&member, change);
        }
    }

    async fn handle_join(&self, mut member: Member, src: SocketAddr) -> Result<(), TransportError> {
        if member.id == *self.local_id() {
            return Ok(());
        }

        tracing::info!("Member {} joining group from {}", member.id, src);

        member.addr = src;
        member.state = MemberState::Alive;
        member.last_seen = Some(Instant::now());

        let previous = self.members.insert(member.id.clone(), member.clone());
        if previous.is_none_or(|p| p.state == MemberState::Dead) {
            self.emit(&member, MembershipChange::Joined);
        }

        tracing::info!("Group size now: {}", self.live_peers().len() + 1);

        let reply = GossipMessage::Ack {
            from: self.local_id().clone(),
            incarnation: self.incarnation.load(Ordering::SeqCst),
            members: self.known_members(),
        };

        self.send_frame(reply, src).await
    }

    fn handle_leave(&self, member_id: MemberId) {
        let left = match self.members.get_mut(&member_id) {
            Some(mut member) if member.state != MemberState::Dead => {
                member.state = MemberState::Dead;
                Some(member.clone())
            }
            _ => None,
        };

        if let Some(member) = left {
            self.emit(&member, MembershipChange::Left);
        }
    }

    async fn handle_suspect(&self, member_id: MemberId, incarnation: u64) {
        if member_id == *self.local_id() {
            let current = self.incarnation.load(Ordering::SeqCst);
            if incarnation < current {
                return;
            }

            let refuted = self.incarnation.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::info!("Refuting suspicion about self (inc={})", refuted);

            if let Some(mut local) = self.members.get_mut(&member_id) {
                local.incarnation = refuted;
            }

            if let Some(socket) = self.socket() {
                let msg = GossipMessage::Alive {
                    member_id,
                    incarnation: refuted,
                };
                self.broadcast_message(&socket, msg).await;
            }
            return;
        }

        match self.members.get_mut(&member_id) {
            Some(mut existing)
                if incarnation >= existing.incarnation && existing.state == MemberState::Alive =>
            {
                tracing::info!("Member {} at {} suspected", existing.id, existing.addr);
                existing.state = MemberState::Suspect;
                existing.incarnation = incarnation;
            }
            Some(_) => {}
            None => {
                tracing::debug!("Suspected member {} doesn't exist", member_id);
            }
        }
    }

    fn handle_alive(&self, member_id: MemberId, incarnation: u64) {
        let revived = match self.members.get_mut(&member_id) {
            Some(mut existing) if incarnation > existing.incarnation => {
                tracing::info!("Member {} is now Alive (inc={})", existing.id, incarnation);
                let was_dead = existing.state == MemberState::Dead;
                existing.state = MemberState::Alive;
                existing.incarnation = incarnation;
                existing.last_seen = Some(Instant::now());
                was_dead.then(|| existing.clone())
            }
            Some(mut existing)
                if incarnation == existing.incarnation && existing.state == MemberState::Suspect =>
            {
                tracing::info!("Member {} refuted suspicion", existing.id);
                existing.state = MemberState::Alive;
                existing.last_seen = Some(Instant::now());
                None
            }
            Some(_) => None,
            None => {
                tracing::debug!("Alive message for unknown member {}", member_id);
                None
            }
        };

        if let Some(member) = revived {
            self.emit(&member, MembershipChange::Joined);
        }
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(FAILURE_DETECTION_INTERVAL);

        loop {
            interval.tick().await;
            let now = Instant::now();

            let mut suspicions = Vec::new();
            let mut departed = Vec::new();

            for mut entry in self.members.iter_mut() {
                let member = entry.value_mut();

                if member.id == *self.local_id() {
                    continue;
                }

                let Some(last_seen) = member.last_seen else {
                    member.last_seen = Some(now);
                    continue;
                };
                let elapsed = now.duration_since(last_seen);

                match member.state {
                    MemberState::Alive if elapsed > SUSPECT_TIMEOUT => {
                        tracing::warn!("Member {} suspected (no contact for {:?})", member.id, elapsed);
                        member.state = MemberState::Suspect;
                        suspicions.push(GossipMessage::Suspect {
                            member_id: member.id.clone(),
                            incarnation: member.incarnation,
                        });
                    }
                    MemberState::Suspect if elapsed > DEAD_TIMEOUT => {
                        tracing::warn!("Member {} declared dead (no contact for {:?})", member.id, elapsed);
                        member.state = MemberState::Dead;
                        departed.push(member.clone());
                    }
                    _ => {}
                }
            }

            for member in departed {
                self.emit(&member, MembershipChange::Left);
            }

            if let Some(socket) = self.socket() {
                for msg in suspicions {
                    self.broadcast_message(&socket, msg).await;
                }
            }
        }
    }

    async fn broadcast_message(&self, socket: &UdpSocket, msg: GossipMessage) {
        let encoded = match self.encode(msg) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!("Failed to encode broadcast: {}", e);
                return;
            }
        };

        if encoded.len() > MAX_DATAGRAM {
            tracing::error!("Dropping oversized broadcast ({} bytes)", encoded.len());
            return;
        }

        for member in self.live_peers() {
            if let Err(e) = socket.send_to(&encoded, member.addr).await {
                tracing::warn!("Failed to broadcast to {}: {}", member.id, e);
            }
        }
    }
}
