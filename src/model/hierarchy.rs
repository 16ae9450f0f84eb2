//! Program, project and phase records that group tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{PhaseId, ProgramId, ProjectId, ResourceId};

/// Soft-delete marker shared by hierarchy records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Visible and in use.
    #[default]
    Active,
    /// Soft-deleted; kept for history.
    Deleted,
}

/// Top-level container owning projects, PMs and an escalation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Internal id.
    pub id: ProgramId,
    /// Key used by the import source.
    pub external_id: String,
    /// Display name.
    pub name: String,
    /// Primary program manager.
    pub pm_resource_id: Option<ResourceId>,
    /// Fallback program manager.
    pub secondary_pm_resource_id: Option<ResourceId>,
    /// Soft-delete status.
    pub status: RecordStatus,
    /// When the program was first imported.
    pub created_at: DateTime<Utc>,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
}

/// A project inside a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Internal id.
    pub id: ProjectId,
    /// Owning program.
    pub program_id: ProgramId,
    /// Key used by the import source.
    pub external_id: String,
    /// Display name.
    pub name: String,
    /// Soft-delete status.
    pub status: RecordStatus,
}

/// A phase inside a project; tasks are keyed by (phase, external id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Internal id.
    pub id: PhaseId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Owning program, denormalised for program-scoped queries.
    pub program_id: ProgramId,
    /// Key used by the import source.
    pub external_id: String,
    /// Display name.
    pub name: String,
    /// Ordering within the project.
    pub sequence: u32,
    /// Soft-delete status.
    pub status: RecordStatus,
}
