//! Transcoding profiles.
//!
//! A profile is a text file holding one transcoder argument per line. Lines
//! starting with `#` are comments; `%{KEY=value}` lines are fields.

use regex::Regex;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use super::types::{Media, Profile};

static FIELD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%\{([a-zA-Z]+)=(.*)\}").expect("valid field pattern"));

/// Reads a profile file. `None` when it cannot be read.
pub fn parse_profile(path: &Path) -> Option<Profile> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            tracing::warn!("Cannot read profile {}: {}", path.display(), err);
            return None;
        }
    };

    Some(parse_profile_str(path, &content))
}

pub fn parse_profile_str(location: &Path, content: &str) -> Profile {
    let mut arguments = Vec::new();
    let mut fields = HashMap::new();

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match FIELD_PATTERN.captures(line) {
            Some(caps) => {
                fields.insert(caps[1].to_uppercase(), caps[2].to_string());
            }
            None => arguments.push(line.to_string()),
        }
    }

    Profile {
        location: location.to_path_buf(),
        arguments,
        fields,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileMatcherKind {
    Companion,
    DirectoryStructure,
    Default,
}

impl FromStr for ProfileMatcherKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "COMPANION" => Ok(Self::Companion),
            "DIRECTORY_STRUCTURE" => Ok(Self::DirectoryStructure),
            "DEFAULT" => Ok(Self::Default),
            other => Err(format!("unknown profile matcher '{}'", other)),
        }
    }
}

impl fmt::Display for ProfileMatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Companion => f.write_str("COMPANION"),
            Self::DirectoryStructure => f.write_str("DIRECTORY_STRUCTURE"),
            Self::Default => f.write_str("DEFAULT"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfileSettings {
    pub input_dir: PathBuf,
    pub profile_dir: PathBuf,
    /// File name looked up by the directory structure matcher.
    pub file_name: String,
    /// Extension including the dot, e.g. `.ffmpeg`.
    pub extension: String,
    pub default_name: String,
}

impl ProfileSettings {
    fn profile_file_name(&self) -> String {
        format!("{}{}", self.file_name, self.extension)
    }
}

pub trait ProfileMatcher: Send + Sync {
    fn find(&self, candidate: &Media) -> Option<Profile>;

    fn kind(&self) -> ProfileMatcherKind;
}

/// Looks for `<source><ext>` next to the media file.
pub struct CompanionMatcher {
    settings: ProfileSettings,
}

impl CompanionMatcher {
    pub fn new(settings: ProfileSettings) -> Self {
        Self { settings }
    }
}

impl ProfileMatcher for CompanionMatcher {
    fn find(&self, candidate: &Media) -> Option<Profile> {
        let mut path = OsString::from(self.settings.input_dir.join(&candidate.source_path));
        path.push(&self.settings.extension);
        let path = PathBuf::from(path);

        if !path.is_file() {
            return None;
        }
        parse_profile(&path)
    }

    fn kind(&self) -> ProfileMatcherKind {
        ProfileMatcherKind::Companion
    }
}

/// Mirrors the source's directories under the profile dir and walks up
/// towards the priority directory until a profile is found.
///
/// For `0/movies/sub/film.mkv` it tries `profiles/0/movies/sub/profile.ffmpeg`,
/// then `profiles/0/movies/profile.ffmpeg`, then `profiles/0/profile.ffmpeg`.
pub struct DirectoryStructureMatcher {
    settings: ProfileSettings,
}

impl DirectoryStructureMatcher {
    pub fn new(settings: ProfileSettings) -> Self {
        Self { settings }
    }
}

impl ProfileMatcher for DirectoryStructureMatcher {
    fn find(&self, candidate: &Media) -> Option<Profile> {
        let parent = candidate.source_path.parent()?;
        let priority_dir = parent.components().next()?;
        let root = self.settings.profile_dir.join(priority_dir);
        let file_name = self.settings.profile_file_name();

        let mut dir = self.settings.profile_dir.join(parent);
        loop {
            let file = dir.join(&file_name);
            if file.is_file()
                && let Some(profile) = parse_profile(&file)
            {
                tracing::info!("Found profile {}", file.display());
                return Some(profile);
            }

            if dir == root || !dir.pop() {
                tracing::debug!("No profile in any directory below {}", root.display());
                return None;
            }
        }
    }

    fn kind(&self) -> ProfileMatcherKind {
        ProfileMatcherKind::DirectoryStructure
    }
}

/// The fallback `<profile dir>/<default name><ext>`.
pub struct DefaultMatcher {
    settings: ProfileSettings,
}

impl DefaultMatcher {
    pub fn new(settings: ProfileSettings) -> Self {
        Self { settings }
    }
}

impl ProfileMatcher for DefaultMatcher {
    fn find(&self, _candidate: &Media) -> Option<Profile> {
        let path = self.settings.profile_dir.join(format!(
            "{}{}",
            self.settings.default_name, self.settings.extension
        ));
        parse_profile(&path)
    }

    fn kind(&self) -> ProfileMatcherKind {
        ProfileMatcherKind::Default
    }
}

/// Resolves the profile for a selected candidate. Blocking.
pub trait ProfileService: Send + Sync {
    fn select_profile(&self, candidate: &Media) -> Option<Profile>;
}

/// Tries each matcher in configured order.
pub struct ProfileResolver {
    matchers: Vec<Box<dyn ProfileMatcher>>,
}

impl ProfileResolver {
    pub fn new(matchers: Vec<Box<dyn ProfileMatcher>>) -> Self {
        Self { matchers }
    }

    pub fn from_kinds(kinds: &[ProfileMatcherKind], settings: &ProfileSettings) -> Self {
        let matchers = kinds
            .iter()
            .map(|kind| -> Box<dyn ProfileMatcher> {
                match kind {
                    ProfileMatcherKind::Companion => Box::new(CompanionMatcher::new(settings.clone())),
                    ProfileMatcherKind::DirectoryStructure => {
                        Box::new(DirectoryStructureMatcher::new(settings.clone()))
                    }
                    ProfileMatcherKind::Default => Box::new(DefaultMatcher::new(settings.clone())),
                }
            })
            .collect();

        Self::new(matchers)
    }
}

impl ProfileService for ProfileResolver {
    fn select_profile(&self, candidate: &Media) -> Option<Profile> {
        for matcher in &self.matchers {
            if let Some(profile) = matcher.find(candidate) {
                tracing::debug!(
                    source = %candidate.source_name(),
                    matcher = %matcher.kind(),
                    "Profile {} selected",
                    profile.location.display()
                );
                return Some(profile);
            }
        }

        tracing::warn!(source = %candidate.source_name(), "No profile found");
        None
    }
}
