use async_trait::async_trait;
use tokio::sync::broadcast;

use super::types::{Channel, InboundMessage, MemberId, MemberView, MembershipEvent, TransportError};

/// Group communication seam.
///
/// Implementations deliver membership changes and application payloads to
/// subscribers. Broadcasts do not loop back to the sender.
#[async_trait]
pub trait GroupTransport: Send + Sync {
    /// Name this transport joins under. Known before `join`.
    fn member_name(&self) -> &MemberId;

    fn is_arbiter(&self) -> bool;

    fn is_joined(&self) -> bool;

    async fn join(&self) -> Result<(), TransportError>;

    async fn leave(&self);

    /// Live members including the local one. Empty when not joined.
    fn members(&self) -> Vec<MemberView>;

    async fn broadcast(&self, channel: Channel, payload: Vec<u8>) -> Result<(), TransportError>;

    async fn send_to(
        &self,
        target: &MemberId,
        channel: Channel,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    fn subscribe_membership(&self) -> broadcast::Receiver<MembershipEvent>;

    fn subscribe_messages(&self) -> broadcast::Receiver<InboundMessage>;
}
