//! Typed import records.
//!
//! An [`ImportBatch`] is what a parser hands to the merge engine: one
//! program's hierarchy, resources, tasks and dependencies, all keyed by the
//! source's external ids. Batches deserialize from YAML or JSON.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::DependencyType;

/// The program a batch belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramRecord {
    /// Stable key.
    pub external_id: String,
    /// Display name.
    pub name: String,
    /// Primary PM, by resource external id.
    #[serde(default)]
    pub pm: Option<String>,
    /// Secondary PM, by resource external id.
    #[serde(default)]
    pub secondary_pm: Option<String>,
}

/// A project row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Stable key within the program.
    pub external_id: String,
    /// Display name.
    pub name: String,
}

/// A phase row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    /// Owning project external id.
    pub project: String,
    /// Stable key within the project.
    pub external_id: String,
    /// Display name.
    pub name: String,
    /// Ordering within the project.
    #[serde(default)]
    pub sequence: u32,
}

/// A resource row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Stable key.
    pub external_id: String,
    /// Display name.
    pub name: String,
    /// Notification address.
    #[serde(default)]
    pub email: Option<String>,
    /// IANA timezone; UTC when absent.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Holiday country.
    #[serde(default)]
    pub country_code: Option<String>,
    /// Maximum utilisation percentage; 100 when absent.
    #[serde(default)]
    pub max_utilization: Option<u8>,
    /// Manager, by external id.
    #[serde(default)]
    pub manager: Option<String>,
    /// Backup, by external id.
    #[serde(default)]
    pub backup: Option<String>,
}

/// A task row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Owning project external id.
    pub project: String,
    /// Owning phase external id.
    pub phase: String,
    /// Stable key within the phase.
    pub external_id: String,
    /// Display name.
    pub name: String,
    /// Baseline start.
    pub planned_start: NaiveDate,
    /// Baseline end.
    pub planned_end: NaiveDate,
    /// Planned effort.
    #[serde(default)]
    pub planned_effort_hours: Option<f64>,
    /// Revenue at stake.
    #[serde(default)]
    pub revenue_impact: Option<f64>,
    /// Strategic importance label.
    #[serde(default)]
    pub strategic_importance: Option<String>,
    /// Assigned resource, by external id.
    #[serde(default)]
    pub resource: Option<String>,
}

/// A dependency row, referencing tasks by external id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRecord {
    /// Predecessor task external id.
    pub predecessor: String,
    /// Successor task external id.
    pub successor: String,
    /// Constraint kind.
    #[serde(default)]
    pub kind: DependencyType,
    /// Lag in days; negative for a lead.
    #[serde(default)]
    pub lag_days: i64,
}

/// One parsed import for one program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBatch {
    /// The program.
    pub program: ProgramRecord,
    /// Projects.
    #[serde(default)]
    pub projects: Vec<ProjectRecord>,
    /// Phases.
    #[serde(default)]
    pub phases: Vec<PhaseRecord>,
    /// Resources.
    #[serde(default)]
    pub resources: Vec<ResourceRecord>,
    /// Tasks.
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
    /// Dependencies.
    #[serde(default)]
    pub dependencies: Vec<DependencyRecord>,
    /// Record a baseline version for this import.
    #[serde(default)]
    pub track_baseline: bool,
    /// Label for the import source (file name, system).
    #[serde(default)]
    pub source: Option<String>,
}

impl TaskRecord {
    /// Checks the record on its own, before any lookups.
    ///
    /// # Errors
    ///
    /// Returns a message describing the first problem found.
    pub fn check(&self) -> std::result::Result<(), String> {
        if self.external_id.trim().is_empty() {
            return Err("task external id is empty".into());
        }
        if self.name.trim().is_empty() {
            return Err("task name is empty".into());
        }
        if self.planned_end < self.planned_start {
            return Err(format!(
                "planned end {} is before planned start {}",
                self.planned_end, self.planned_start
            ));
        }
        if self.planned_effort_hours.is_some_and(|h| h < 0.0) {
            return Err("planned effort is negative".into());
        }
        Ok(())
    }
}
