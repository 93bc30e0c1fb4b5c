use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::membership::types::MemberId;

/// Messages on the `Rpc` channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RpcMessage {
    CancelRequest { request_id: Uuid, target: MemberId },
    CancelResponse { request_id: Uuid, cancelled: bool },
}

impl RpcMessage {
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
