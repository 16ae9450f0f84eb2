//! Immutable per-program baseline snapshots.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ProgramId, TaskId};

/// Planned dates of one task at baseline time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineTask {
    /// Task id.
    pub task_id: TaskId,
    /// External key.
    pub external_id: String,
    /// Baseline start.
    pub planned_start: NaiveDate,
    /// Baseline end.
    pub planned_end: NaiveDate,
}

/// Append-only, monotonically versioned baseline of a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineVersion {
    /// Program.
    pub program_id: ProgramId,
    /// Version number, starting at 1.
    pub version: u32,
    /// What produced the baseline (import source label).
    pub source: String,
    /// Earliest planned start.
    pub start_date: Option<NaiveDate>,
    /// Latest planned end.
    pub end_date: Option<NaiveDate>,
    /// Non-cancelled tasks included.
    pub task_count: usize,
    /// Sum of planned effort.
    pub total_effort_hours: f64,
    /// Full task snapshot when requested.
    pub tasks: Option<Vec<BaselineTask>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}
