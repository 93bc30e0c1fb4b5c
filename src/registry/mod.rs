//! Task Registry Module
//!
//! Cluster-wide view of which member is transcoding which media, with progress.
//! Used to keep two members from picking the same source and to expose cluster
//! progress over the REST API.

pub mod protocol;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;
