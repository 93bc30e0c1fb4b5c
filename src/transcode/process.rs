//! External Process Transcoder
//!
//! Runs ffmpeg or HandBrakeCLI with profile arguments, parses progress from
//! both output streams and supports cancellation by killing the child.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::service::TranscodingService;
use super::types::{TranscodeResult, TranscodeTask, TranscoderKind};
use crate::media::types::{Media, Profile};
use crate::progress::parser::{FfmpegParser, HandbrakeParser, ProgressParser};
use crate::progress::types::TranscodeProgress;

pub const INPUT_PLACEHOLDER: &str = "${INPUT}";
pub const OUTPUT_PLACEHOLDER: &str = "${OUTPUT}";

const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);
const PROGRESS_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct TranscoderSettings {
    pub kind: TranscoderKind,
    pub executable: PathBuf,
    pub input_dir: PathBuf,
    pub temp_dir: PathBuf,
    /// Extension used when the profile has no `FORMAT` field, e.g. `.mkv`.
    pub default_format: String,
}

#[derive(Clone)]
struct ActiveJob {
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

type SharedParser = Arc<Mutex<Box<dyn ProgressParser>>>;

pub struct ProcessTranscoder {
    settings: TranscoderSettings,
    active: Mutex<Option<ActiveJob>>,
    progress_tx: broadcast::Sender<TranscodeProgress>,
}

impl ProcessTranscoder {
    pub fn new(settings: TranscoderSettings) -> Self {
        let (progress_tx, _) = broadcast::channel(PROGRESS_CAPACITY);

        Self {
            settings,
            active: Mutex::new(None),
            progress_tx,
        }
    }

    /// `<temp dir>/<source stem><FORMAT or default extension>`
    pub fn temporary_path(&self, media: &Media, profile: &Profile) -> PathBuf {
        let stem = media
            .source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let format = profile
            .field(Profile::FORMAT_FIELD)
            .unwrap_or(&self.settings.default_format);

        self.settings.temp_dir.join(format!("{}{}", stem, format))
    }

    /// Profile arguments with `${INPUT}` and `${OUTPUT}` substituted.
    pub fn arguments(&self, media: &Media, profile: &Profile, output: &Path) -> Vec<String> {
        let input = self.settings.input_dir.join(&media.source_path);
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();

        profile
            .arguments
            .iter()
            .map(|arg| {
                arg.replace(INPUT_PLACEHOLDER, &input)
                    .replace(OUTPUT_PLACEHOLDER, &output)
            })
            .collect()
    }

    fn parser(&self) -> Box<dyn ProgressParser> {
        match self.settings.kind {
            TranscoderKind::Ffmpeg => Box::new(FfmpegParser::new()),
            TranscoderKind::Handbrake => Box::new(HandbrakeParser),
        }
    }

    async fn run(&self, task: &TranscodeTask, output: &Path, cancel: &CancellationToken) -> Result<ExitStatus> {
        tokio::fs::create_dir_all(&self.settings.temp_dir)
            .await
            .with_context(|| format!("creating {}", self.settings.temp_dir.display()))?;

        let args = self.arguments(&task.media, &task.profile, output);
        tracing::info!(
            "Starting transcoding process: from {} to {}. This might take a while...",
            task.media.source_name(),
            output.display()
        );
        tracing::debug!("Running {} {}", self.settings.executable.display(), args.join(" "));

        let mut child = Command::new(&self.settings.executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", self.settings.executable.display()))?;

        let parser: SharedParser = Arc::new(Mutex::new(self.parser()));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, parser.clone(), self.progress_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, parser, self.progress_tx.clone()));
        }

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                tracing::info!("Transcoding cancelled, killing process");
                child.kill().await?;
                child.wait().await?
            }
        };

        for reader in readers {
            if cancel.is_cancelled() {
                reader.abort();
            } else {
                let _ = reader.await;
            }
        }

        Ok(status)
    }

    fn finish(&self, done: watch::Sender<bool>) {
        if let Ok(mut active) = self.active.lock() {
            *active = None;
        }
        let _ = done.send(true);
        let _ = self.progress_tx.send(TranscodeProgress::Finished);
    }
}

fn spawn_reader<R>(stream: R, parser: SharedParser, tx: broadcast::Sender<TranscodeProgress>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        // Progress lines are terminated by carriage returns.
        let mut segments = BufReader::new(stream).split(b'\r');

        while let Ok(Some(segment)) = segments.next_segment().await {
            for line in String::from_utf8_lossy(&segment).lines() {
                tracing::trace!("transcoder: {}", line);

                let sample = parser.lock().ok().and_then(|mut p| p.parse_line(line));
                if let Some(sample) = sample {
                    let _ = tx.send(TranscodeProgress::Sample(sample));
                }
            }
        }
    })
}

#[async_trait]
impl TranscodingService for ProcessTranscoder {
    async fn transcode(&self, task: TranscodeTask) -> TranscodeResult {
        let temporary_path = self.temporary_path(&task.media, &task.profile);
        let mut result = TranscodeResult {
            media: task.media.clone(),
            profile: task.profile.clone(),
            temporary_path,
            successful: false,
            cancelled: false,
        };

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        {
            let Ok(mut active) = self.active.lock() else {
                return result;
            };
            if active.is_some() {
                tracing::warn!("Transcoder busy, rejecting {}", task.media.source_name());
                return result;
            }
            *active = Some(ActiveJob {
                cancel: cancel.clone(),
                done: done_rx,
            });
        }

        match self.run(&task, &result.temporary_path, &cancel).await {
            Ok(status) => {
                result.cancelled = cancel.is_cancelled();
                result.successful = status.success() && !result.cancelled;
            }
            Err(e) => {
                result.cancelled = cancel.is_cancelled();
                tracing::error!("Transcoding of {} failed: {:#}", task.media.source_name(), e);
            }
        }

        self.finish(done_tx);

        if result.successful {
            tracing::info!("Transcoding finished");
        } else {
            tracing::info!("Transcoding failed or cancelled.");
        }
        result
    }

    async fn cancel_transcode(&self) -> bool {
        let job = self.active.lock().ok().and_then(|active| active.clone());
        let Some(mut job) = job else {
            return true;
        };

        tracing::debug!("Cancelling task...");
        job.cancel.cancel();

        matches!(
            tokio::time::timeout(CANCEL_TIMEOUT, job.done.wait_for(|done| *done)).await,
            Ok(Ok(_))
        )
    }

    fn is_active(&self) -> bool {
        self.active.lock().map(|a| a.is_some()).unwrap_or(false)
    }

    fn progress(&self) -> broadcast::Receiver<TranscodeProgress> {
        self.progress_tx.subscribe()
    }
}
