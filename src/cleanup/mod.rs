//! Cleanup Module
//!
//! Post-transcode pipeline: moves the output into place and retires the
//! source so the scanner does not pick it again.

pub mod processor;
pub mod service;
pub mod types;
