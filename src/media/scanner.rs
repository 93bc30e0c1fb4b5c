use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::types::Media;

/// Finds transcoding candidates. Blocking; call from `spawn_blocking`.
pub trait MediaScanService: Send + Sync {
    /// Candidates grouped by priority directory.
    fn retrieve_files(&self) -> Result<BTreeMap<u32, Vec<Media>>>;

    fn retrieve_files_as_list(&self) -> Result<Vec<Media>> {
        Ok(self.retrieve_files()?.into_values().flatten().collect())
    }
}

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub input_dir: PathBuf,
    /// Allowed extensions without the leading dot, compared case-insensitively.
    pub extensions: Vec<String>,
    /// Marker extension, e.g. `.done`.
    pub skip_extension: String,
    pub mark_source_dir: Option<PathBuf>,
}

pub struct FileMediaScanner {
    settings: ScanSettings,
}

impl FileMediaScanner {
    pub fn new(settings: ScanSettings) -> Self {
        Self { settings }
    }

    fn priority_of(dir: &Path) -> Option<u32> {
        dir.file_name()?.to_str()?.parse().ok()
    }

    fn has_allowed_extension(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.settings
            .extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    fn with_marker(&self, path: &Path) -> PathBuf {
        let mut name = OsString::from(path.as_os_str());
        name.push(&self.settings.skip_extension);
        PathBuf::from(name)
    }

    /// A file is done when `<file><skip ext>` exists next to it or in the mark-source tree.
    fn is_marked(&self, file: &Path, relative: &Path) -> bool {
        if self.with_marker(file).exists() {
            return true;
        }

        self.settings
            .mark_source_dir
            .as_ref()
            .is_some_and(|dir| self.with_marker(&dir.join(relative)).exists())
    }

    fn is_in_mark_dir(&self, path: &Path) -> bool {
        self.settings
            .mark_source_dir
            .as_ref()
            .is_some_and(|dir| path.starts_with(dir))
    }

    fn media_in(&self, priority_dir: &Path, priority: u32) -> Vec<Media> {
        let mut found = Vec::new();

        for entry in WalkDir::new(priority_dir)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.is_in_mark_dir(e.path()))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("Skipping unreadable entry: {}", err);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.has_allowed_extension(entry.path()) {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&self.settings.input_dir) else {
                continue;
            };

            if self.is_marked(entry.path(), relative) {
                tracing::debug!("Ignoring marked file {}", relative.display());
                continue;
            }

            let media = Media::new(relative, priority);
            tracing::debug!(source = %media.source_name(), priority, "Found candidate");
            found.push(media);
        }

        found
    }
}

impl MediaScanService for FileMediaScanner {
    fn retrieve_files(&self) -> Result<BTreeMap<u32, Vec<Media>>> {
        let input = &self.settings.input_dir;
        tracing::info!("Scanning for directories in {}", input.display());

        let entries = std::fs::read_dir(input)
            .with_context(|| format!("cannot read input directory {}", input.display()))?;

        let mut result: BTreeMap<u32, Vec<Media>> = BTreeMap::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let Some(priority) = Self::priority_of(&path) else {
                continue;
            };

            tracing::info!("Found input directory {}", path.display());
            result
                .entry(priority)
                .or_default()
                .extend(self.media_in(&path, priority));
        }

        Ok(result)
    }
}
