//! REST Data Types
//!
//! JSON shapes served under `/api/v1`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::types::TaskRecord;

/// A task currently processed somewhere in the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDto {
    /// Path under the input directory, e.g. `0/movies/film.mp4`.
    pub source: String,
    pub priority: u32,
    pub added: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Percentage rounded to two decimals.
    pub progress: f64,
    pub nodename: String,
}

impl From<TaskRecord> for TaskDto {
    fn from(record: TaskRecord) -> Self {
        Self {
            source: record.source_name,
            priority: record.priority,
            added: record.date_added,
            updated: record.last_updated,
            progress: (record.percentage * 100.0).round() / 100.0,
            nodename: record.owner.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfoDto {
    pub members: usize,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionDto {
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct StopQuery {
    /// Empty or absent means the local node.
    pub hostname: Option<String>,
}
