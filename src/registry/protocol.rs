//! Registry Replication Protocol
//!
//! Messages exchanged on the `Tasks` channel. Every mutation is broadcast as a
//! full record (`Put`) or a tombstone (`Remove`), so replaying a message is harmless.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::TaskRecord;
use crate::membership::types::MemberId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RegistryMessage {
    Put(TaskRecord),
    /// Applies only if `at` is not older than the replica's record.
    Remove {
        owner: MemberId,
        at: DateTime<Utc>,
    },
    /// Sent by a joining member; every peer answers with its own record.
    SyncRequest,
    Snapshot(Vec<TaskRecord>),
}

impl RegistryMessage {
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
