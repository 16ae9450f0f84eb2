//! Audit trail entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of entity an audit entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Program.
    Program,
    /// Task.
    Task,
    /// Dependency.
    Dependency,
    /// Resource.
    Resource,
    /// Alert.
    Alert,
    /// Response.
    Response,
    /// Baseline version.
    Baseline,
}

/// Which subsystem caused a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    /// An import batch.
    Import,
    /// The scheduler.
    Scheduler,
    /// A status response or approval.
    StatusResponse,
    /// The escalation sweep.
    Escalation,
    /// A person acting directly.
    Manual,
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Entity created.
    Created,
    /// A field changed.
    Updated,
    /// Entity soft-cancelled.
    Cancelled,
    /// Entity flagged for review.
    Flagged,
    /// Alert escalated.
    Escalated,
    /// Response submitted.
    Responded,
    /// Delay approved.
    DelayApproved,
    /// Delay rejected.
    DelayRejected,
    /// Dates shifted by propagation.
    Rescheduled,
    /// Dependency removal acknowledged.
    Removed,
}

/// One recorded mutation with its cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Entity kind.
    pub entity_kind: EntityKind,
    /// Entity id.
    pub entity_id: String,
    /// What happened.
    pub action: AuditAction,
    /// Field changed, when a single field changed.
    pub field: Option<String>,
    /// Previous value.
    pub old_value: Option<String>,
    /// New value.
    pub new_value: Option<String>,
    /// Originating subsystem.
    pub source: ChangeSource,
    /// Who or what made the change.
    pub actor: String,
    /// Free-form reason.
    pub reason: Option<String>,
    /// When.
    pub at: DateTime<Utc>,
}
