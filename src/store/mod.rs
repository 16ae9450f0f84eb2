//! Work graph store: persistence boundary for the tracking engine.
//!
//! Engines read through the query methods and write through atomic
//! [`ChangeSet`]s. Alerts, tokens and responses have dedicated methods
//! because their writes carry uniqueness or compare-and-swap semantics:
//!
//! - [`WorkGraphStore::insert_alert`] enforces one non-terminal alert per
//!   (task, deadline, alert type) and returns the existing alert on conflict.
//! - [`WorkGraphStore::consume_token`] claims a magic-link token exactly once.
//! - [`WorkGraphStore::append_response`] assigns the next response version
//!   and supersedes the previous latest response in one step.

pub mod memory;
pub mod snapshot;

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{Error, Result};
use crate::model::{
    Alert, AlertId, AlertStatus, AuditEntry, BaselineVersion, Dependency, DependencyId,
    EscalationPolicy, Phase, PhaseId, Program, ProgramId, Project, ProjectId, Resource,
    ResourceId, ResponseId, ResponseToken, StatusResponse, Task, TaskId,
};

pub use memory::InMemoryStore;

/// A batch of writes applied atomically: either every entry lands or none does.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Programs to insert or replace.
    pub programs: Vec<Program>,
    /// Projects to insert or replace.
    pub projects: Vec<Project>,
    /// Phases to insert or replace.
    pub phases: Vec<Phase>,
    /// Resources to insert or replace. Manager and backup links are validated.
    pub resources: Vec<Resource>,
    /// Tasks to insert or replace.
    pub tasks: Vec<Task>,
    /// Dependencies to insert or replace.
    pub dependencies: Vec<Dependency>,
    /// Dependencies whose removal was explicitly acknowledged.
    pub removed_dependencies: Vec<DependencyId>,
    /// New baseline versions.
    pub baselines: Vec<BaselineVersion>,
    /// Audit entries describing the change.
    pub audit: Vec<AuditEntry>,
}

impl ChangeSet {
    /// Whether the change set writes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
            && self.projects.is_empty()
            && self.phases.is_empty()
            && self.resources.is_empty()
            && self.tasks.is_empty()
            && self.dependencies.is_empty()
            && self.removed_dependencies.is_empty()
            && self.baselines.is_empty()
            && self.audit.is_empty()
    }
}

/// Outcome of an alert insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertInsert {
    /// The alert was stored.
    Inserted(Alert),
    /// A non-terminal alert with the same key already existed.
    Existing(Alert),
}

impl AlertInsert {
    /// The stored alert, whichever way the insert went.
    #[must_use]
    pub fn alert(&self) -> &Alert {
        match self {
            Self::Inserted(alert) | Self::Existing(alert) => alert,
        }
    }

    /// Whether this call created the alert.
    #[must_use]
    pub const fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Outcome of a token claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenClaim {
    /// This caller claimed the token.
    Claimed(ResponseToken),
    /// Another caller got there first, or the token was revoked.
    AlreadyUsed,
}

/// Storage for the work graph, alerts and responses.
pub trait WorkGraphStore: Send + Sync {
    /// Looks up a program.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn program(&self, id: &ProgramId) -> Result<Option<Program>>;

    /// Looks up a program by its import key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn program_by_external_id(&self, external_id: &str) -> Result<Option<Program>>;

    /// Lists all programs.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn programs(&self) -> Result<Vec<Program>>;

    /// Looks up a project of a program by import key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn project_by_external_id(
        &self,
        program: &ProgramId,
        external_id: &str,
    ) -> Result<Option<Project>>;

    /// Looks up a phase of a project by import key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn phase_by_external_id(&self, project: &ProjectId, external_id: &str)
        -> Result<Option<Phase>>;

    /// Looks up a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn task(&self, id: &TaskId) -> Result<Option<Task>>;

    /// Point lookup by (phase, external id).
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn task_by_key(&self, phase: &PhaseId, external_id: &str) -> Result<Option<Task>>;

    /// All tasks of a program, cancelled ones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn tasks_for_program(&self, program: &ProgramId) -> Result<Vec<Task>>;

    /// Open tasks whose forecast end lies in `from..=to`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn tasks_due_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Task>>;

    /// Non-cancelled tasks of a program whose external id is not in `seen`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn ghost_tasks(&self, program: &ProgramId, seen: &HashSet<String>) -> Result<Vec<Task>>;

    /// Dependencies whose endpoints both belong to the program.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn dependencies_for_program(&self, program: &ProgramId) -> Result<Vec<Dependency>>;

    /// Looks up a resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn resource(&self, id: &ResourceId) -> Result<Option<Resource>>;

    /// Looks up a resource by import key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn resource_by_external_id(&self, external_id: &str) -> Result<Option<Resource>>;

    /// Applies a change set atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceHierarchy`] when a resource link would create a
    /// cycle or self-reference, or a storage error; nothing is written then.
    fn apply(&self, changes: ChangeSet) -> Result<()>;

    /// Inserts an alert unless a non-terminal alert with the same
    /// (task, deadline, type) exists, in which case that alert is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn insert_alert(&self, alert: Alert) -> Result<AlertInsert>;

    /// Looks up an alert.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn alert(&self, id: &AlertId) -> Result<Option<Alert>>;

    /// Alerts currently in any of the given states.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn alerts_with_status(&self, statuses: &[AlertStatus]) -> Result<Vec<Alert>>;

    /// All alerts raised for a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn alerts_for_task(&self, task: &TaskId) -> Result<Vec<Alert>>;

    /// Replaces a stored alert.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the alert does not exist.
    fn update_alert(&self, alert: &Alert) -> Result<()>;

    /// Stores a new token.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn insert_token(&self, token: ResponseToken) -> Result<()>;

    /// Looks up a token by hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn token(&self, token_hash: &str) -> Result<Option<ResponseToken>>;

    /// Claims a token by compare-and-swap on its used state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenNotFound`] if no such token exists.
    fn consume_token(&self, token_hash: &str, at: DateTime<Utc>) -> Result<TokenClaim>;

    /// Withdraws an unused token so it can never be claimed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenNotFound`] if no such token exists.
    fn revoke_token(&self, token_hash: &str) -> Result<()>;

    /// Looks up a response.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn response(&self, id: &ResponseId) -> Result<Option<StatusResponse>>;

    /// Finds the response submitted under an idempotency key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn response_by_idempotency_key(&self, key: &str) -> Result<Option<StatusResponse>>;

    /// Responses for a task in version order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn responses_for_task(&self, task: &TaskId) -> Result<Vec<StatusResponse>>;

    /// Appends a response as the task's new latest version. The version
    /// number and latest flags are assigned by the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn append_response(&self, response: StatusResponse) -> Result<StatusResponse>;

    /// Replaces a stored response (approval state only changes here).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the response does not exist.
    fn update_response(&self, response: &StatusResponse) -> Result<()>;

    /// Baseline versions of a program in version order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn baselines_for_program(&self, program: &ProgramId) -> Result<Vec<BaselineVersion>>;

    /// Appends audit entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn record_audit(&self, entries: Vec<AuditEntry>) -> Result<()>;

    /// The full audit log in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn audit_log(&self) -> Result<Vec<AuditEntry>>;

    /// The program's escalation policy, falling back to the global policy and
    /// then to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn escalation_policy(&self, program: Option<&ProgramId>) -> Result<EscalationPolicy>;

    /// Stores a policy, replacing any with the same scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn set_escalation_policy(&self, policy: EscalationPolicy) -> Result<()>;
}

/// Upward link followed when walking the resource hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Manager,
    Backup,
}

impl Link {
    fn target(self, resource: &Resource) -> Option<&ResourceId> {
        match self {
            Self::Manager => resource.manager_id.as_ref(),
            Self::Backup => resource.backup_resource_id.as_ref(),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Backup => "backup",
        }
    }
}

/// Rejects manager and backup links that point at the resource itself or
/// loop back to it, walking at most `cap` links upward.
///
/// # Errors
///
/// Returns [`Error::ResourceHierarchy`] naming the first offending resource.
pub fn validate_resource_links(
    resources: &BTreeMap<ResourceId, Resource>,
    changed: &[ResourceId],
    cap: usize,
) -> Result<()> {
    for id in changed {
        let Some(resource) = resources.get(id) else {
            continue;
        };
        for link in [Link::Manager, Link::Backup] {
            let Some(first) = link.target(resource) else { continue };
            let label = link.label();
            if first == id {
                return Err(Error::ResourceHierarchy {
                    resource: resource.external_id.clone(),
                    message: format!("{label} link points at itself"),
                });
            }
            let mut cursor = Some(first.clone());
            let mut hops = 0;
            while let Some(current) = cursor {
                if &current == id {
                    return Err(Error::ResourceHierarchy {
                        resource: resource.external_id.clone(),
                        message: format!("{label} chain loops back after {hops} hops"),
                    });
                }
                hops += 1;
                if hops > cap {
                    return Err(Error::ResourceHierarchy {
                        resource: resource.external_id.clone(),
                        message: format!("{label} chain longer than {cap}"),
                    });
                }
                cursor = resources.get(&current).and_then(|r| link.target(r)).cloned();
            }
        }
    }
    Ok(())
}
