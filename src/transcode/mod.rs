//! Transcode Module
//!
//! The transcoding collaborator: a trait seam plus the external-process
//! implementation driving ffmpeg or HandBrakeCLI.

pub mod process;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
