//! Distributed Transcoding Cluster Library
//!
//! This library crate defines the modules that make up a clustercode node.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! Nodes coordinate without a central server. Each one scans a shared input
//! tree, claims a file through the replicated task registry and transcodes it.
//!
//! - **`membership`**: Group membership behind a pluggable transport. A UDP
//!   gossip protocol (SWIM-like) in production, an in-memory loopback in tests
//!   and as the single-node fallback.
//! - **`registry`**: The replicated task registry. One record per member,
//!   last-writer-wins replication and periodic orphan eviction.
//! - **`cancel`**: Request/response cancellation of a member's running job.
//! - **`progress`**: Transcoder output parsing and the latest-progress cache.
//! - **`cluster`**: The facade the workflow and the REST API talk to.
//! - **`workflow`**: The per-node state machine (scan, select, transcode, cleanup).
//! - **`media`**, **`transcode`**, **`cleanup`**: The collaborators the workflow drives.
//! - **`api`**: REST endpoints over the facade.
//! - **`config`**: Environment driven configuration.
//! - **`shutdown`**: Termination signals for graceful exit.

pub mod api;
pub mod cancel;
pub mod cleanup;
pub mod cluster;
pub mod config;
pub mod media;
pub mod membership;
pub mod progress;
pub mod registry;
pub mod shutdown;
pub mod transcode;
pub mod workflow;

#[cfg(test)]
pub mod testing;
