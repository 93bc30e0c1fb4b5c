use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;
use thiserror::Error;

/// Cluster-unique member name. Doubles as the hostname accepted by the cancel API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(pub String);

impl MemberId {
    /// `<hostname>-<8 hex chars>`, unique even when several nodes share a host.
    pub fn generate() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "node".to_string());
        let suffix = uuid::Uuid::new_v4().simple().to_string();

        Self(format!("{}-{}", host, &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MemberId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemberState {
    Alive,
    Suspect,
    Dead,
}

/// A single member as tracked by the gossip transport.
///
/// `incarnation` is the member's logical clock; a higher incarnation always wins,
/// which is how a member refutes a false "Suspect" claim about itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub addr: SocketAddr,
    pub state: MemberState,
    pub incarnation: u64,
    pub arbiter: bool,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

/// Transport-independent view of a live member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberView {
    pub id: MemberId,
    pub arbiter: bool,
}

/// Logical sub-channels multiplexed over one group connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Replicated task registry traffic.
    Tasks,
    /// Request/response traffic (cancellation).
    Rpc,
}

/// The gossip wire protocol.
///
/// - `Ping/Ack`: liveness checks; a `Ping` carries the sender's role, an `Ack` its member list.
/// - `Join/Leave`: explicit group entry and graceful exit.
/// - `Suspect/Alive`: disseminate health changes.
/// - `Data`: application payload for one of the [`Channel`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Ping {
        from: MemberId,
        incarnation: u64,
        arbiter: bool,
    },

    Ack {
        from: MemberId,
        incarnation: u64,
        members: Vec<Member>,
    },

    Join {
        member: Member,
    },

    Leave {
        member_id: MemberId,
    },

    Suspect {
        member_id: MemberId,
        incarnation: u64,
    },

    Alive {
        member_id: MemberId,
        incarnation: u64,
    },

    Data {
        from: MemberId,
        channel: Channel,
        payload: Vec<u8>,
    },
}

/// Every datagram is tagged with the group name; frames for other groups are dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub group: String,
    pub message: GossipMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    Joined,
    Left,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipEvent {
    pub member: MemberId,
    pub arbiter: bool,
    pub change: MembershipChange,
}

/// Application payload delivered from a peer.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub from: MemberId,
    pub channel: Channel,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("not joined to a group")]
    NotJoined,

    #[error("unknown member {0}")]
    UnknownMember(MemberId),

    #[error("send failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec failure: {0}")]
    Codec(#[from] bincode::Error),
}
