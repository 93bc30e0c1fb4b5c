//! Cleanup processors.
//!
//! Output processors move the transcoded file out of the temp directory;
//! source processors delete or mark the original so it is not picked again.
//! Results that failed or were cancelled are left alone by every processor.

use anyhow::{Context, Result};
use chrono::Local;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::types::{CleanupContext, CleanupKind, CleanupSettings};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d.%H-%M-%S";

pub trait CleanupProcessor: Send + Sync {
    fn process(&self, context: CleanupContext) -> Result<CleanupContext>;

    fn kind(&self) -> CleanupKind;
}

pub fn build_processor(kind: CleanupKind, settings: &CleanupSettings) -> Box<dyn CleanupProcessor> {
    let settings = settings.clone();
    match kind {
        CleanupKind::UnifiedOutput => Box::new(UnifiedOutput { settings }),
        CleanupKind::StructuredOutput => Box::new(StructuredOutput { settings }),
        CleanupKind::DeleteSource => Box::new(DeleteSource { settings }),
        CleanupKind::MarkSource => Box::new(MarkSource { settings }),
        CleanupKind::MarkSourceDir => Box::new(MarkSourceDir { settings }),
    }
}

/// `/out/film.mkv` becomes `/out/film.<stamp>.mkv`.
pub fn timestamped_path(path: &Path, stamp: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}.{}.{}", stem, stamp, ext.to_string_lossy()),
        None => format!("{}.{}", stem, stamp),
    };
    path.with_file_name(name)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create directory {}", parent.display()))?;
    }
    Ok(())
}

/// Moves `source` to `target`, falling back to copy and delete across filesystems.
fn move_file(source: &Path, target: &Path, overwrite: bool) -> Result<PathBuf> {
    let target = if target.exists() && !overwrite {
        let stamped = timestamped_path(target, &Local::now().format(TIMESTAMP_FORMAT).to_string());
        tracing::debug!("{} exists, writing {} instead", target.display(), stamped.display());
        stamped
    } else {
        target.to_path_buf()
    };

    create_parent(&target)?;
    tracing::info!("Moving {} to {}", source.display(), target.display());

    if std::fs::rename(source, &target).is_err() {
        std::fs::copy(source, &target).with_context(|| {
            format!("cannot move {} to {}", source.display(), target.display())
        })?;
        std::fs::remove_file(source)
            .with_context(|| format!("cannot remove {}", source.display()))?;
    }

    Ok(target)
}

fn skip_unusable(context: &CleanupContext, action: &str) -> bool {
    if context.is_usable() {
        return false;
    }
    tracing::warn!(
        source = %context.result.media.source_name(),
        "Not {}, since transcoding did not succeed",
        action
    );
    true
}

fn create_marker(marker: &Path, source: &Path) {
    if let Err(err) = create_parent(marker).and_then(|_| {
        std::fs::File::create(marker)
            .map(|_| ())
            .with_context(|| format!("cannot create {}", marker.display()))
    }) {
        tracing::error!(
            "{:#}. {} may be scheduled for transcoding again",
            err,
            source.display()
        );
    }
}

pub struct UnifiedOutput {
    settings: CleanupSettings,
}

impl CleanupProcessor for UnifiedOutput {
    fn process(&self, mut context: CleanupContext) -> Result<CleanupContext> {
        if skip_unusable(&context, "moving output") {
            return Ok(context);
        }

        let temp = &context.result.temporary_path;
        let file_name = temp
            .file_name()
            .with_context(|| format!("output {} has no file name", temp.display()))?;
        let target = self.settings.output_dir.join(file_name);

        context.output_path = Some(move_file(temp, &target, self.settings.overwrite)?);
        Ok(context)
    }

    fn kind(&self) -> CleanupKind {
        CleanupKind::UnifiedOutput
    }
}

/// Mirrors the source's directories below the priority dir into the output dir.
pub struct StructuredOutput {
    settings: CleanupSettings,
}

impl StructuredOutput {
    fn target_dir(&self, source: &Path) -> PathBuf {
        let mut dir = self.settings.output_dir.clone();
        if let Some(parent) = source.parent() {
            dir.extend(parent.components().skip(1));
        }
        dir
    }
}

impl CleanupProcessor for StructuredOutput {
    fn process(&self, mut context: CleanupContext) -> Result<CleanupContext> {
        if skip_unusable(&context, "moving output") {
            return Ok(context);
        }

        let temp = &context.result.temporary_path;
        let file_name = temp
            .file_name()
            .with_context(|| format!("output {} has no file name", temp.display()))?;
        let target = self
            .target_dir(&context.result.media.source_path)
            .join(file_name);

        context.output_path = Some(move_file(temp, &target, self.settings.overwrite)?);
        Ok(context)
    }

    fn kind(&self) -> CleanupKind {
        CleanupKind::StructuredOutput
    }
}

pub struct DeleteSource {
    settings: CleanupSettings,
}

impl CleanupProcessor for DeleteSource {
    fn process(&self, context: CleanupContext) -> Result<CleanupContext> {
        if skip_unusable(&context, "deleting source") {
            return Ok(context);
        }

        let source = self.settings.input_dir.join(&context.result.media.source_path);
        tracing::info!("Deleting {}", source.display());
        match std::fs::remove_file(&source) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!("Could not delete {}: {}", source.display(), err),
        }

        Ok(context)
    }

    fn kind(&self) -> CleanupKind {
        CleanupKind::DeleteSource
    }
}

/// Creates `<source><skip ext>` next to the source.
pub struct MarkSource {
    settings: CleanupSettings,
}

impl CleanupProcessor for MarkSource {
    fn process(&self, context: CleanupContext) -> Result<CleanupContext> {
        if skip_unusable(&context, "marking source") {
            return Ok(context);
        }

        let source = self.settings.input_dir.join(&context.result.media.source_path);
        if !source.exists() {
            tracing::warn!("Not marking {}, it does not exist anymore", source.display());
            return Ok(context);
        }

        create_marker(&with_suffix(&source, &self.settings.skip_extension), &source);
        Ok(context)
    }

    fn kind(&self) -> CleanupKind {
        CleanupKind::MarkSource
    }
}

/// Creates the marker in the mark-source tree instead of the input tree.
pub struct MarkSourceDir {
    settings: CleanupSettings,
}

impl CleanupProcessor for MarkSourceDir {
    fn process(&self, context: CleanupContext) -> Result<CleanupContext> {
        if skip_unusable(&context, "marking source") {
            return Ok(context);
        }

        let relative = &context.result.media.source_path;
        let source = self.settings.input_dir.join(relative);
        if !source.exists() {
            tracing::warn!("Not marking {}, it does not exist anymore", source.display());
            return Ok(context);
        }

        let marker = with_suffix(
            &self.settings.mark_source_dir.join(relative),
            &self.settings.skip_extension,
        );
        create_marker(&marker, &source);
        Ok(context)
    }

    fn kind(&self) -> CleanupKind {
        CleanupKind::MarkSourceDir
    }
}
