use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::membership::types::MemberId;

/// One member's in-flight task. The registry holds at most one per owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Separator-normalized source path relative to the input directory.
    pub source_name: String,
    pub priority: u32,
    pub date_added: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// 0.0..=100.0
    pub percentage: f64,
    pub owner: MemberId,
}

impl TaskRecord {
    /// `source_name` compared the way the cluster deduplicates work:
    /// separator-normalized and case-insensitive.
    pub fn matches_source(&self, source_name: &str) -> bool {
        self.source_name
            .replace('\\', "/")
            .eq_ignore_ascii_case(&source_name.replace('\\', "/"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryChange {
    Added(TaskRecord),
    Updated(TaskRecord),
    Removed(MemberId),
    /// The local replica was emptied, e.g. on leaving the group.
    Cleared,
}

/// Change notification carrying the post-change snapshot.
#[derive(Debug, Clone)]
pub struct RegistryEvent {
    pub change: RegistryChange,
    pub tasks: Vec<TaskRecord>,
}
