//! Transcoder Output Parsers
//!
//! Turn individual output lines of ffmpeg or HandBrakeCLI into [`ProgressSample`]s.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

use super::types::ProgressSample;

static FFMPEG_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("valid duration regex")
});
static FFMPEG_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("valid time regex")
});
static FFMPEG_FPS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"fps=\s*(\d+(?:\.\d+)?)").expect("valid fps regex"));
static FFMPEG_SPEED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"speed=\s*(\d+(?:\.\d+)?)x").expect("valid speed regex"));
static FFMPEG_BITRATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bitrate=\s*(\S+)").expect("valid bitrate regex"));

static HANDBRAKE_PROGRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Encoding:.*?(\d+(?:\.\d+)?)\s*%(?:\s*\((\d+(?:\.\d+)?)\s*fps,\s*avg\s*(\d+(?:\.\d+)?)\s*fps,\s*ETA\s*(\d+)h(\d+)m(\d+)s\))?",
    )
    .expect("valid handbrake regex")
});

pub trait ProgressParser: Send {
    /// `None` for lines that carry no progress.
    fn parse_line(&mut self, line: &str) -> Option<ProgressSample>;
}

/// Tracks the input duration announced in the header, then reports `time=` against it.
#[derive(Debug, Default)]
pub struct FfmpegParser {
    duration: Option<f64>,
}

impl FfmpegParser {
    pub fn new() -> Self {
        Self::default()
    }
}

fn hms_seconds(caps: &regex::Captures<'_>) -> Option<f64> {
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn capture_f64(re: &Regex, line: &str) -> Option<f64> {
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

impl ProgressParser for FfmpegParser {
    fn parse_line(&mut self, line: &str) -> Option<ProgressSample> {
        if self.duration.is_none()
            && let Some(caps) = FFMPEG_DURATION.captures(line)
        {
            self.duration = hms_seconds(&caps).filter(|d| *d > 0.0);
            return None;
        }

        let duration = self.duration?;
        let elapsed = FFMPEG_TIME.captures(line).and_then(|caps| hms_seconds(&caps))?;

        let mut sample = ProgressSample::new(elapsed / duration * 100.0);
        sample.fps = capture_f64(&FFMPEG_FPS, line);
        sample.speed = capture_f64(&FFMPEG_SPEED, line);
        sample.bitrate = FFMPEG_BITRATE
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        sample.eta = sample
            .speed
            .filter(|speed| *speed > 0.0)
            .map(|speed| Duration::from_secs_f64(((duration - elapsed) / speed).max(0.0)));

        Some(sample)
    }
}

/// HandBrakeCLI prints `Encoding: task 1 of 1, 45.67 % (23.4 fps, avg 24.0 fps, ETA 00h12m34s)`.
#[derive(Debug, Default)]
pub struct HandbrakeParser;

impl ProgressParser for HandbrakeParser {
    fn parse_line(&mut self, line: &str) -> Option<ProgressSample> {
        let caps = HANDBRAKE_PROGRESS.captures(line)?;
        let percentage: f64 = caps.get(1)?.as_str().parse().ok()?;

        let mut sample = ProgressSample::new(percentage);
        sample.fps = caps.get(2).and_then(|m| m.as_str().parse().ok());

        let eta = (caps.get(4), caps.get(5), caps.get(6));
        if let (Some(h), Some(m), Some(s)) = eta {
            let h: u64 = h.as_str().parse().ok()?;
            let m: u64 = m.as_str().parse().ok()?;
            let s: u64 = s.as_str().parse().ok()?;
            sample.eta = Some(Duration::from_secs(h * 3600 + m * 60 + s));
        }

        Some(sample)
    }
}
