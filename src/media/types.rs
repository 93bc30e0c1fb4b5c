use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A transcoding candidate found under the input directory.
///
/// `source_path` is relative to the input directory and starts with the
/// priority directory, e.g. `2/movies/film.mkv`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Media {
    pub source_path: PathBuf,
    pub priority: u32,
}

impl Media {
    pub fn new(source_path: impl Into<PathBuf>, priority: u32) -> Self {
        Self {
            source_path: source_path.into(),
            priority,
        }
    }

    /// Separator-normalized source path, the form stored in the task registry.
    pub fn source_name(&self) -> String {
        normalize_path(&self.source_path)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.source_path.file_name().and_then(|n| n.to_str())
    }
}

/// Replaces Windows separators so paths compare equal across platforms.
pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// A parsed transcoding profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub location: PathBuf,
    /// Command line arguments, one entry per non-comment line.
    pub arguments: Vec<String>,
    /// `%{KEY=value}` fields, keys upper-cased.
    pub fields: HashMap<String, String>,
}

impl Profile {
    pub const FORMAT_FIELD: &'static str = "FORMAT";

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(&key.to_uppercase()).map(String::as_str)
    }
}
