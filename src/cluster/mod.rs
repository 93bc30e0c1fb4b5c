//! Cluster Module
//!
//! Facade over membership, the task registry, cancellation and progress.

pub mod facade;
