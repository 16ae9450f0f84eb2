//! Domain records shared by the store and the engines.

pub mod alert;
pub mod audit;
pub mod baseline;
pub mod dependency;
pub mod hierarchy;
pub mod ids;
pub mod policy;
pub mod reason;
pub mod resource;
pub mod response;
pub mod task;

pub use alert::{Alert, AlertStatus, AlertType, Urgency, MAX_ESCALATION_LEVEL};
pub use audit::{AuditAction, AuditEntry, ChangeSource, EntityKind};
pub use baseline::{BaselineTask, BaselineVersion};
pub use dependency::{Dependency, DependencyType};
pub use hierarchy::{Phase, Program, Project, RecordStatus};
pub use ids::{AlertId, DependencyId, PhaseId, ProgramId, ProjectId, ResourceId, ResponseId, TaskId};
pub use policy::EscalationPolicy;
pub use reason::{CalculationMethod, DelayReason, DurationRecalculation};
pub use resource::{Availability, Resource};
pub use response::{
    ApprovalStatus, ReportedStatus, ResponseSubmission, ResponseToken, StatusResponse,
};
pub use task::{Task, WorkStatus};
