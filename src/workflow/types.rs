use std::fmt;
use std::time::Duration;

use crate::media::types::{Media, Profile};
use crate::transcode::types::TranscodeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Initial,
    ScanMedia,
    Wait,
    SelectMedia,
    SelectProfile,
    Transcode,
    Cleanup,
    Arbiter,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initial => "INITIAL",
            Self::ScanMedia => "SCAN_MEDIA",
            Self::Wait => "WAIT",
            Self::SelectMedia => "SELECT_MEDIA",
            Self::SelectProfile => "SELECT_PROFILE",
            Self::Transcode => "TRANSCODE",
            Self::Cleanup => "CLEANUP",
            Self::Arbiter => "ARBITER",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateEvent {
    Finished,
    Timeout,
    NoResult,
    Result,
    Error,
    Cancelled,
}

impl fmt::Display for StateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Finished => "FINISHED",
            Self::Timeout => "TIMEOUT",
            Self::NoResult => "NO_RESULT",
            Self::Result => "RESULT",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Scratch data carried from one state to the next. Never leaves the node.
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    pub candidates: Vec<Media>,
    pub selected_media: Option<Media>,
    pub selected_profile: Option<Profile>,
    pub transcode_result: Option<TranscodeResult>,
}

impl WorkflowContext {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Published on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: State,
    pub to: State,
    pub event: StateEvent,
}

/// Work performed between leaving one state and entering the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionAction {
    /// Publish the selected media as this node's task.
    PublishTask,
    /// Remove this node's task from the registry.
    RetireTask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub to: State,
    pub action: Option<TransitionAction>,
}

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub arbiter: bool,
    /// How long WAIT lasts before rescanning.
    pub scan_interval: Duration,
    /// Pause after joining alone, in case peers show up late.
    pub solo_grace: Duration,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            arbiter: false,
            scan_interval: Duration::from_secs(30 * 60),
            solo_grace: Duration::from_secs(5),
        }
    }
}
