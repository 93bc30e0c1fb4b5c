use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::media::types::{Media, Profile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscoderKind {
    Ffmpeg,
    Handbrake,
}

impl FromStr for TranscoderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FFMPEG" => Ok(Self::Ffmpeg),
            "HANDBRAKE" => Ok(Self::Handbrake),
            other => Err(format!("unknown transcoder type '{}'", other)),
        }
    }
}

impl fmt::Display for TranscoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ffmpeg => f.write_str("FFMPEG"),
            Self::Handbrake => f.write_str("HANDBRAKE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeTask {
    pub media: Media,
    pub profile: Profile,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeResult {
    pub media: Media,
    pub profile: Profile,
    /// Where the transcoder wrote its output.
    pub temporary_path: PathBuf,
    pub successful: bool,
    pub cancelled: bool,
}
