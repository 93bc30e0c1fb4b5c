use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// One progress observation parsed from transcoder output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSample {
    /// 0.0..=100.0
    pub percentage: f64,
    pub fps: Option<f64>,
    pub speed: Option<f64>,
    pub bitrate: Option<String>,
    pub eta: Option<Duration>,
    pub recorded_at: DateTime<Utc>,
}

impl ProgressSample {
    pub fn new(percentage: f64) -> Self {
        Self {
            percentage: percentage.clamp(0.0, 100.0),
            fps: None,
            speed: None,
            bitrate: None,
            eta: None,
            recorded_at: Utc::now(),
        }
    }
}

/// Items on a transcoder's progress stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscodeProgress {
    Sample(ProgressSample),
    /// The running job ended, successfully or not.
    Finished,
}
