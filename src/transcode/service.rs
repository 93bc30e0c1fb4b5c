use async_trait::async_trait;
use tokio::sync::broadcast;

use super::types::{TranscodeResult, TranscodeTask};
use crate::progress::types::TranscodeProgress;

/// Runs one transcoding job at a time.
#[async_trait]
pub trait TranscodingService: Send + Sync {
    /// Runs `task` to completion. Failures are reported in the result, never as panics.
    async fn transcode(&self, task: TranscodeTask) -> TranscodeResult;

    /// Stops the running job. True when nothing is running or the job stopped in time.
    async fn cancel_transcode(&self) -> bool;

    fn is_active(&self) -> bool;

    fn progress(&self) -> broadcast::Receiver<TranscodeProgress>;
}
