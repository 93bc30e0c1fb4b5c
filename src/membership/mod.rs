//! Membership & Discovery Module
//!
//! Tracks which nodes currently belong to the transcoding group and carries
//! application traffic between them.
//!
//! ## Core Mechanisms
//! - **Gossip Transport**: UDP, SWIM-like. Nodes exchange pings and member lists and walk
//!   silent peers through `Alive -> Suspect -> Dead` (reported as "left").
//! - **Loopback Transport**: in-process group used for single-node fallback and tests.
//! - **Channels**: `Tasks` (registry replication) and `Rpc` (cancellation) share one group.
//! - **Incarnation Numbers**: resolve disputes about a member's health.

pub mod gossip;
pub mod loopback;
pub mod service;
pub mod transport;
pub mod types;

#[cfg(test)]
mod tests;
