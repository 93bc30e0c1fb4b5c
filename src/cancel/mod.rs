//! Cancel Module
//!
//! Cluster-wide cancellation of a member's running transcoding job.

pub mod handler;
pub mod protocol;
