use anyhow::Result;

use super::processor::{CleanupProcessor, build_processor};
use super::types::{CleanupContext, CleanupKind, CleanupSettings};
use crate::transcode::types::TranscodeResult;

/// Runs after every transcode. Blocking; call from `spawn_blocking`.
pub trait CleanupService: Send + Sync {
    fn perform_cleanup(&self, result: &TranscodeResult) -> Result<CleanupContext>;
}

/// Runs the configured processors in order.
pub struct CleanupPipeline {
    processors: Vec<Box<dyn CleanupProcessor>>,
}

impl CleanupPipeline {
    pub fn new(processors: Vec<Box<dyn CleanupProcessor>>) -> Self {
        Self { processors }
    }

    pub fn from_kinds(kinds: &[CleanupKind], settings: &CleanupSettings) -> Self {
        Self::new(
            kinds
                .iter()
                .map(|kind| build_processor(*kind, settings))
                .collect(),
        )
    }

    pub fn kinds(&self) -> Vec<CleanupKind> {
        self.processors.iter().map(|p| p.kind()).collect()
    }
}

impl CleanupService for CleanupPipeline {
    fn perform_cleanup(&self, result: &TranscodeResult) -> Result<CleanupContext> {
        tracing::info!(source = %result.media.source_name(), "Performing cleanup");

        let mut context = CleanupContext::new(result.clone());
        for processor in &self.processors {
            tracing::debug!(processor = %processor.kind(), "Cleanup step");
            context = processor.process(context)?;
        }

        if result.cancelled {
            tracing::info!("Cleanup completed for cancelled job");
        } else {
            tracing::info!("Cleanup completed");
        }
        Ok(context)
    }
}
