//! Progress Module
//!
//! Parses transcoder output into progress samples and keeps the latest one
//! for the cluster facade and the REST API.

pub mod cache;
pub mod parser;
pub mod types;
