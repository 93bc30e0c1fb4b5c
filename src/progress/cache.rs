use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::types::{ProgressSample, TranscodeProgress};

/// Most recent progress of the local transcoding job.
///
/// Holds nothing while idle; [`ProgressCache::percentage`] then reports `-1.0`.
pub struct ProgressCache {
    latest: watch::Sender<Option<ProgressSample>>,
}

impl Default for ProgressCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCache {
    pub const IDLE: f64 = -1.0;

    pub fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self { latest }
    }

    pub fn record(&self, sample: ProgressSample) {
        self.latest.send_replace(Some(sample));
    }

    pub fn reset(&self) {
        self.latest.send_replace(None);
    }

    pub fn latest(&self) -> Option<ProgressSample> {
        self.latest.borrow().clone()
    }

    pub fn percentage(&self) -> f64 {
        self.latest
            .borrow()
            .as_ref()
            .map(|s| s.percentage)
            .unwrap_or(Self::IDLE)
    }

    /// Wakes on every recorded sample and on reset.
    pub fn watch(&self) -> watch::Receiver<Option<ProgressSample>> {
        self.latest.subscribe()
    }

    /// Feeds the cache from a transcoder's progress stream until it closes.
    pub fn follow(
        self: std::sync::Arc<Self>,
        mut stream: broadcast::Receiver<TranscodeProgress>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match stream.recv().await {
                    Ok(TranscodeProgress::Sample(sample)) => self.record(sample),
                    Ok(TranscodeProgress::Finished) => self.reset(),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Progress cache skipped {} samples", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
