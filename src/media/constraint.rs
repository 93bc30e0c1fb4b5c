//! Selection constraints.
//!
//! A candidate is eligible only when every active constraint accepts it.

use anyhow::{Result, bail};
use chrono::{Local, NaiveTime};
use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::types::Media;

const MIB: u64 = 1024 * 1024;

pub trait Constraint: Send + Sync {
    fn accept(&self, candidate: &Media) -> bool;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    FileSize,
    Time,
    FileName,
}

impl ConstraintKind {
    pub const ALL: [ConstraintKind; 3] = [Self::FileSize, Self::Time, Self::FileName];

    /// Parses a space separated list. `NONE` yields nothing, `ALL` every kind.
    pub fn parse_list(value: &str) -> Result<Vec<ConstraintKind>, String> {
        let mut kinds = Vec::new();

        for token in value.split_whitespace() {
            match token.to_ascii_uppercase().as_str() {
                "NONE" => return Ok(Vec::new()),
                "ALL" => return Ok(Self::ALL.to_vec()),
                _ => {
                    let kind = token.parse()?;
                    if !kinds.contains(&kind) {
                        kinds.push(kind);
                    }
                }
            }
        }

        Ok(kinds)
    }
}

impl FromStr for ConstraintKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FILE_SIZE" => Ok(Self::FileSize),
            "TIME" => Ok(Self::Time),
            "FILE_NAME" => Ok(Self::FileName),
            other => Err(format!("unknown constraint '{}'", other)),
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileSize => f.write_str("FILE_SIZE"),
            Self::Time => f.write_str("TIME"),
            Self::FileName => f.write_str("FILE_NAME"),
        }
    }
}

// ============================================================
// FILE SIZE
// ============================================================

/// Accepts files whose size lies inside a window. A bound of 0 is disabled.
pub struct FileSizeConstraint {
    input_dir: PathBuf,
    min_bytes: u64,
    max_bytes: u64,
}

impl FileSizeConstraint {
    pub fn new(input_dir: impl Into<PathBuf>, min_bytes: u64, max_bytes: u64) -> Result<Self> {
        if min_bytes > 0 && max_bytes > 0 && min_bytes >= max_bytes {
            bail!(
                "minimum file size ({}) must be smaller than maximum ({})",
                min_bytes,
                max_bytes
            );
        }

        Ok(Self {
            input_dir: input_dir.into(),
            min_bytes,
            max_bytes,
        })
    }

    pub fn from_mib(input_dir: impl Into<PathBuf>, min_mib: f64, max_mib: f64) -> Result<Self> {
        let to_bytes = |mib: f64| if mib > 0.0 { (mib * MIB as f64) as u64 } else { 0 };
        Self::new(input_dir, to_bytes(min_mib), to_bytes(max_mib))
    }

    fn enabled(&self) -> bool {
        self.min_bytes > 0 || self.max_bytes > 0
    }
}

impl Constraint for FileSizeConstraint {
    fn accept(&self, candidate: &Media) -> bool {
        if !self.enabled() {
            return true;
        }

        let path = self.input_dir.join(&candidate.source_path);
        let size = match std::fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(err) => {
                tracing::warn!("Cannot read size of {}: {}", path.display(), err);
                return false;
            }
        };

        let accepted = (self.min_bytes == 0 || size >= self.min_bytes)
            && (self.max_bytes == 0 || size <= self.max_bytes);

        if !accepted {
            tracing::debug!(source = %candidate.source_name(), size, "Declined by file size");
        }
        accepted
    }

    fn name(&self) -> &'static str {
        "file size"
    }
}

// ============================================================
// TIME OF DAY
// ============================================================

/// Accepts candidates only while the local time is inside `[begin, stop]`.
/// A window with `begin > stop` wraps over midnight.
pub struct TimeConstraint {
    begin: NaiveTime,
    stop: NaiveTime,
}

impl TimeConstraint {
    pub fn new(begin: NaiveTime, stop: NaiveTime) -> Result<Self> {
        if begin == stop {
            bail!("time window begin and stop must differ ({})", begin);
        }
        Ok(Self { begin, stop })
    }

    pub fn parse(begin: &str, stop: &str) -> Result<Self> {
        Self::new(parse_time(begin)?, parse_time(stop)?)
    }

    pub fn accept_at(&self, now: NaiveTime) -> bool {
        if self.begin < self.stop {
            self.begin < now && now < self.stop
        } else {
            now > self.begin || now < self.stop
        }
    }
}

pub fn parse_time(value: &str) -> Result<NaiveTime> {
    match NaiveTime::parse_from_str(value.trim(), "%H:%M") {
        Ok(time) => Ok(time),
        Err(err) => bail!("invalid time '{}', expected HH:MM: {}", value, err),
    }
}

impl Constraint for TimeConstraint {
    fn accept(&self, candidate: &Media) -> bool {
        let accepted = self.accept_at(Local::now().time());
        if !accepted {
            tracing::debug!(
                source = %candidate.source_name(),
                "Outside of time window {}-{}",
                self.begin.format("%H:%M"),
                self.stop.format("%H:%M")
            );
        }
        accepted
    }

    fn name(&self) -> &'static str {
        "time"
    }
}

// ============================================================
// FILE NAME
// ============================================================

/// Accepts candidates whose relative source path fully matches a pattern.
pub struct FileNameConstraint {
    pattern: Regex,
}

impl FileNameConstraint {
    pub fn new(pattern: &str) -> Result<Self> {
        let anchored = format!("^(?:{})$", pattern);
        match Regex::new(&anchored) {
            Ok(pattern) => Ok(Self { pattern }),
            Err(err) => bail!("invalid file name pattern '{}': {}", pattern, err),
        }
    }
}

impl Constraint for FileNameConstraint {
    fn accept(&self, candidate: &Media) -> bool {
        self.pattern.is_match(&candidate.source_name())
    }

    fn name(&self) -> &'static str {
        "file name"
    }
}
