//! Transcode Module Tests
//!
//! ## Test Scopes
//! - **Argument Building**: placeholder substitution and temporary file naming.
//! - **Process Lifecycle**: success, failure, missing executable.
//! - **Cancellation**: idle cancel and killing a running job.
//! - **Progress Stream**: samples parsed from child output, `Finished` at the end.
//!
//! Process tests drive `/bin/sh` scripts in place of a real transcoder.

#[cfg(test)]
mod tests {
    use crate::media::types::{Media, Profile};
    use crate::progress::types::TranscodeProgress;
    use crate::transcode::process::{ProcessTranscoder, TranscoderSettings};
    use crate::transcode::service::TranscodingService;
    use crate::transcode::types::{TranscodeTask, TranscoderKind};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    fn transcoder(temp: &Path, executable: &str, kind: TranscoderKind) -> ProcessTranscoder {
        ProcessTranscoder::new(TranscoderSettings {
            kind,
            executable: PathBuf::from(executable),
            input_dir: PathBuf::from("/input"),
            temp_dir: temp.to_path_buf(),
            default_format: ".mkv".to_string(),
        })
    }

    fn profile(arguments: &[&str], fields: &[(&str, &str)]) -> Profile {
        Profile {
            location: PathBuf::from("/profiles/default.ffmpeg"),
            arguments: arguments.iter().map(|a| a.to_string()).collect(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    fn shell_task(script: &str) -> TranscodeTask {
        TranscodeTask {
            media: Media::new("1/movie.avi", 1),
            profile: profile(&["-c", script], &[]),
        }
    }

    // ============================================================
    // ARGUMENT TESTS
    // ============================================================

    #[test]
    fn test_placeholders_are_substituted() {
        let temp = tempfile::tempdir().unwrap();
        let transcoder = transcoder(temp.path(), "ffmpeg", TranscoderKind::Ffmpeg);
        let media = Media::new("1/movie.avi", 1);
        let profile = profile(&["-i", "${INPUT}", "-c:v", "copy", "${OUTPUT}"], &[]);

        let args = transcoder.arguments(&media, &profile, Path::new("/tmp/movie.mkv"));

        assert_eq!(
            args,
            vec!["-i", "/input/1/movie.avi", "-c:v", "copy", "/tmp/movie.mkv"]
        );
    }

    #[test]
    fn test_temporary_path_uses_format_field() {
        let temp = tempfile::tempdir().unwrap();
        let transcoder = transcoder(temp.path(), "ffmpeg", TranscoderKind::Ffmpeg);
        let media = Media::new("1/movie.avi", 1);

        let default = transcoder.temporary_path(&media, &profile(&[], &[]));
        let custom = transcoder.temporary_path(&media, &profile(&[], &[("FORMAT", ".mp4")]));

        assert_eq!(default, temp.path().join("movie.mkv"));
        assert_eq!(custom, temp.path().join("movie.mp4"));
    }

    #[test]
    fn test_transcoder_kind_parsing() {
        assert_eq!("ffmpeg".parse::<TranscoderKind>(), Ok(TranscoderKind::Ffmpeg));
        assert_eq!("HANDBRAKE".parse::<TranscoderKind>(), Ok(TranscoderKind::Handbrake));
        assert!("vlc".parse::<TranscoderKind>().is_err());
    }

    // ============================================================
    // PROCESS LIFECYCLE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_successful_process() {
        let temp = tempfile::tempdir().unwrap();
        let transcoder = transcoder(temp.path(), "sh", TranscoderKind::Handbrake);

        let result = transcoder.transcode(shell_task("exit 0")).await;

        assert!(result.successful);
        assert!(!result.cancelled);
        assert!(!transcoder.is_active());
    }

    #[tokio::test]
    async fn test_failing_process() {
        let temp = tempfile::tempdir().unwrap();
        let transcoder = transcoder(temp.path(), "sh", TranscoderKind::Handbrake);

        let result = transcoder.transcode(shell_task("exit 3")).await;

        assert!(!result.successful);
        assert!(!result.cancelled);
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let temp = tempfile::tempdir().unwrap();
        let transcoder = transcoder(temp.path(), "/nonexistent/transcoder", TranscoderKind::Ffmpeg);

        let result = transcoder.transcode(shell_task("exit 0")).await;

        assert!(!result.successful);
        assert!(!transcoder.is_active());
    }

    // ============================================================
    // PROGRESS TESTS
    // ============================================================

    #[tokio::test]
    async fn test_progress_is_streamed() {
        let temp = tempfile::tempdir().unwrap();
        let transcoder = transcoder(temp.path(), "sh", TranscoderKind::Handbrake);
        let mut progress = transcoder.progress();

        let result = transcoder
            .transcode(shell_task(
                "printf 'Encoding: task 1 of 1, 25.00 %%\\rEncoding: task 1 of 1, 50.00 %%\\n'",
            ))
            .await;
        assert!(result.successful);

        let mut seen = Vec::new();
        while let Ok(item) = progress.try_recv() {
            seen.push(item);
        }

        let percentages: Vec<f64> = seen
            .iter()
            .filter_map(|item| match item {
                TranscodeProgress::Sample(sample) => Some(sample.percentage),
                TranscodeProgress::Finished => None,
            })
            .collect();
        assert_eq!(percentages, vec![25.0, 50.0]);
        assert_eq!(seen.last(), Some(&TranscodeProgress::Finished));
    }

    // ============================================================
    // CANCELLATION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_cancel_when_idle_succeeds() {
        let temp = tempfile::tempdir().unwrap();
        let transcoder = transcoder(temp.path(), "sh", TranscoderKind::Ffmpeg);

        assert!(transcoder.cancel_transcode().await);
    }

    #[tokio::test]
    async fn test_cancel_running_process() {
        // ARRANGE
        let temp = tempfile::tempdir().unwrap();
        let transcoder = Arc::new(transcoder(temp.path(), "sh", TranscoderKind::Ffmpeg));
        let running = {
            let transcoder = transcoder.clone();
            tokio::spawn(async move { transcoder.transcode(shell_task("exec sleep 30")).await })
        };

        for _ in 0..100 {
            if transcoder.is_active() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(transcoder.is_active());

        // ACT
        let cancelled = transcoder.cancel_transcode().await;

        // ASSERT
        assert!(cancelled);
        let result = running.await.unwrap();
        assert!(result.cancelled);
        assert!(!result.successful);
        assert!(!transcoder.is_active());
    }
}
