//! Tasks and their three date pairs.
//!
//! `planned_*` is the baseline owned by imports, `current_*` the forecast
//! owned by the scheduler and approvals, `actual_*` the reality reported by
//! people. Tasks are never hard-deleted.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{PhaseId, ProgramId, ResourceId, TaskId};

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WorkStatus {
    /// Not yet started.
    #[default]
    #[serde(rename = "Not Started")]
    NotStarted,
    /// Work is underway.
    #[serde(rename = "In Progress")]
    InProgress,
    /// Done.
    Completed,
    /// Paused.
    #[serde(rename = "On Hold")]
    OnHold,
    /// Soft-deleted.
    Cancelled,
}

impl WorkStatus {
    /// Human label, matching the import vocabulary.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "Not Started",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::OnHold => "On Hold",
            Self::Cancelled => "Cancelled",
        }
    }
}

/// A schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Internal id.
    pub id: TaskId,
    /// Stable key from the import source, unique within a phase.
    pub external_id: String,
    /// Owning phase.
    pub phase_id: PhaseId,
    /// Owning program.
    pub program_id: ProgramId,
    /// Display name.
    pub name: String,
    /// Baseline start.
    pub planned_start: NaiveDate,
    /// Baseline end.
    pub planned_end: NaiveDate,
    /// Forecast start.
    pub current_start: NaiveDate,
    /// Forecast end.
    pub current_end: NaiveDate,
    /// Reported start.
    pub actual_start: Option<NaiveDate>,
    /// Reported end.
    pub actual_end: Option<NaiveDate>,
    /// Planned effort.
    pub planned_effort_hours: Option<f64>,
    /// Revenue at stake if the task slips.
    pub revenue_impact: Option<f64>,
    /// Free-form strategic importance from the import.
    pub strategic_importance: Option<String>,
    /// Lifecycle status.
    pub status: WorkStatus,
    /// Completion, 0..=100.
    pub completion_percent: u8,
    /// Slack from the last critical path run.
    pub slack_days: Option<i64>,
    /// Whether the last critical path run found zero slack.
    pub is_critical_path: bool,
    /// Needs a human decision.
    pub flag_for_review: bool,
    /// Why the task was flagged.
    pub review_message: Option<String>,
    /// Assigned resource.
    pub resource_id: Option<ResourceId>,
    /// Why the task was cancelled.
    pub cancellation_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Forecast duration in days (`current_end - current_start`).
    #[must_use]
    pub fn duration_days(&self) -> i64 {
        (self.current_end - self.current_start).num_days()
    }

    /// Whether the task still takes part in scheduling and tracking.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !matches!(self.status, WorkStatus::Cancelled | WorkStatus::Completed)
    }

    /// Whether the task has any recorded progress that an import must not discard.
    #[must_use]
    pub fn has_progress(&self) -> bool {
        self.actual_start.is_some()
            || matches!(self.status, WorkStatus::InProgress | WorkStatus::OnHold)
    }

    /// Flags the task for human review with the given message.
    pub fn flag(&mut self, message: impl Into<String>) {
        self.flag_for_review = true;
        self.review_message = Some(message.into());
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Builds a not-started task with identical baseline and forecast.
    pub(crate) fn task(id: &str, start: NaiveDate, end: NaiveDate) -> Task {
        let at = DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_default();
        Task {
            id: TaskId::new(id),
            external_id: id.to_string(),
            phase_id: PhaseId::new("phase-1"),
            program_id: ProgramId::new("prog-1"),
            name: format!("Task {id}"),
            planned_start: start,
            planned_end: end,
            current_start: start,
            current_end: end,
            actual_start: None,
            actual_end: None,
            planned_effort_hours: None,
            revenue_impact: None,
            strategic_importance: None,
            status: WorkStatus::NotStarted,
            completion_percent: 0,
            slack_days: None,
            is_critical_path: false,
            flag_for_review: false,
            review_message: None,
            resource_id: None,
            cancellation_reason: None,
            created_at: at,
            updated_at: at,
        }
    }
}
