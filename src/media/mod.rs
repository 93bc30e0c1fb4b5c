//! Media Module
//!
//! Everything about finding work on the local filesystem: scanning the input
//! tree for candidates, filtering them through constraints, choosing one that
//! no other member is working on, and resolving its transcoding profile.

pub mod constraint;
pub mod profile;
pub mod scanner;
pub mod selection;
pub mod types;
