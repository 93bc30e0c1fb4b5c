use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::transcode::types::TranscodeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CleanupKind {
    UnifiedOutput,
    StructuredOutput,
    DeleteSource,
    MarkSource,
    MarkSourceDir,
}

impl CleanupKind {
    /// Parses a space separated, ordered list. Duplicates are dropped.
    pub fn parse_list(value: &str) -> Result<Vec<CleanupKind>, String> {
        let mut kinds = Vec::new();
        for token in value.split_whitespace() {
            let kind: CleanupKind = token.parse()?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Ok(kinds)
    }
}

impl FromStr for CleanupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UNIFIED_OUTPUT" => Ok(Self::UnifiedOutput),
            "STRUCTURED_OUTPUT" => Ok(Self::StructuredOutput),
            "DELETE_SOURCE" => Ok(Self::DeleteSource),
            "MARK_SOURCE" => Ok(Self::MarkSource),
            "MARK_SOURCE_DIR" => Ok(Self::MarkSourceDir),
            other => Err(format!("unknown cleanup strategy '{}'", other)),
        }
    }
}

impl fmt::Display for CleanupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UnifiedOutput => "UNIFIED_OUTPUT",
            Self::StructuredOutput => "STRUCTURED_OUTPUT",
            Self::DeleteSource => "DELETE_SOURCE",
            Self::MarkSource => "MARK_SOURCE",
            Self::MarkSourceDir => "MARK_SOURCE_DIR",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct CleanupSettings {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Marker extension, e.g. `.done`.
    pub skip_extension: String,
    pub mark_source_dir: PathBuf,
    pub overwrite: bool,
}

/// Passed through the processors in order.
#[derive(Debug, Clone)]
pub struct CleanupContext {
    pub result: TranscodeResult,
    /// Final location of the transcoded file once an output processor moved it.
    pub output_path: Option<PathBuf>,
}

impl CleanupContext {
    pub fn new(result: TranscodeResult) -> Self {
        Self {
            result,
            output_path: None,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.result.successful && !self.result.cancelled
    }
}
