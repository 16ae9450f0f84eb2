//! In-memory store implementation.
//!
//! [`InMemoryStore`] keeps the whole work graph behind one `RwLock`. The CLI
//! loads it from a YAML snapshot (see [`super::snapshot`]) and writes it back
//! after each command; tests use it directly.

use std::collections::{BTreeMap, HashSet};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{validate_resource_links, AlertInsert, ChangeSet, TokenClaim, WorkGraphStore};
use crate::config::DEFAULT_MAX_DEPENDENCY_DEPTH;
use crate::error::{Error, Result};
use crate::model::{
    Alert, AlertId, AlertStatus, AuditEntry, BaselineVersion, Dependency, DependencyId,
    EscalationPolicy, Phase, PhaseId, Program, ProgramId, Project, ProjectId, Resource,
    ResourceId, ResponseId, ResponseToken, StatusResponse, Task, TaskId, WorkStatus,
};

/// Everything the store holds, in a serialisable form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreState {
    /// Programs by id.
    pub programs: BTreeMap<ProgramId, Program>,
    /// Projects by id.
    pub projects: BTreeMap<ProjectId, Project>,
    /// Phases by id.
    pub phases: BTreeMap<PhaseId, Phase>,
    /// Resources by id.
    pub resources: BTreeMap<ResourceId, Resource>,
    /// Tasks by id.
    pub tasks: BTreeMap<TaskId, Task>,
    /// Dependencies by id.
    pub dependencies: BTreeMap<DependencyId, Dependency>,
    /// Alerts by id.
    pub alerts: BTreeMap<AlertId, Alert>,
    /// Magic-link tokens by hash.
    pub tokens: BTreeMap<String, ResponseToken>,
    /// Responses by id.
    pub responses: BTreeMap<ResponseId, StatusResponse>,
    /// Baseline versions in creation order.
    pub baselines: Vec<BaselineVersion>,
    /// Escalation policies; at most one per scope.
    pub policies: Vec<EscalationPolicy>,
    /// Audit log in insertion order.
    pub audit: Vec<AuditEntry>,
}

/// In-memory [`WorkGraphStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::LockPoisoned("work graph store".into())
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `state`.
    #[must_use]
    pub fn from_state(state: StoreState) -> Self {
        Self { state: RwLock::new(state) }
    }

    /// Returns a copy of the full state.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn snapshot(&self) -> Result<StoreState> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> Result<T> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(f(&state))
    }
}

impl WorkGraphStore for InMemoryStore {
    fn program(&self, id: &ProgramId) -> Result<Option<Program>> {
        self.read(|s| s.programs.get(id).cloned())
    }

    fn program_by_external_id(&self, external_id: &str) -> Result<Option<Program>> {
        self.read(|s| s.programs.values().find(|p| p.external_id == external_id).cloned())
    }

    fn programs(&self) -> Result<Vec<Program>> {
        self.read(|s| s.programs.values().cloned().collect())
    }

    fn project_by_external_id(
        &self,
        program: &ProgramId,
        external_id: &str,
    ) -> Result<Option<Project>> {
        self.read(|s| {
            s.projects
                .values()
                .find(|p| &p.program_id == program && p.external_id == external_id)
                .cloned()
        })
    }

    fn phase_by_external_id(
        &self,
        project: &ProjectId,
        external_id: &str,
    ) -> Result<Option<Phase>> {
        self.read(|s| {
            s.phases
                .values()
                .find(|p| &p.project_id == project && p.external_id == external_id)
                .cloned()
        })
    }

    fn task(&self, id: &TaskId) -> Result<Option<Task>> {
        self.read(|s| s.tasks.get(id).cloned())
    }

    fn task_by_key(&self, phase: &PhaseId, external_id: &str) -> Result<Option<Task>> {
        self.read(|s| {
            s.tasks
                .values()
                .find(|t| &t.phase_id == phase && t.external_id == external_id)
                .cloned()
        })
    }

    fn tasks_for_program(&self, program: &ProgramId) -> Result<Vec<Task>> {
        self.read(|s| s.tasks.values().filter(|t| &t.program_id == program).cloned().collect())
    }

    fn tasks_due_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Task>> {
        self.read(|s| {
            s.tasks
                .values()
                .filter(|t| t.is_open() && t.actual_end.is_none())
                .filter(|t| t.current_end >= from && t.current_end <= to)
                .cloned()
                .collect()
        })
    }

    fn ghost_tasks(&self, program: &ProgramId, seen: &HashSet<String>) -> Result<Vec<Task>> {
        self.read(|s| {
            s.tasks
                .values()
                .filter(|t| &t.program_id == program)
                .filter(|t| t.status != WorkStatus::Cancelled)
                .filter(|t| !seen.contains(&t.external_id))
                .cloned()
                .collect()
        })
    }

    fn dependencies_for_program(&self, program: &ProgramId) -> Result<Vec<Dependency>> {
        self.read(|s| {
            let members: HashSet<&TaskId> =
                s.tasks.values().filter(|t| &t.program_id == program).map(|t| &t.id).collect();
            s.dependencies
                .values()
                .filter(|d| {
                    members.contains(&d.predecessor_id) && members.contains(&d.successor_id)
                })
                .cloned()
                .collect()
        })
    }

    fn resource(&self, id: &ResourceId) -> Result<Option<Resource>> {
        self.read(|s| s.resources.get(id).cloned())
    }

    fn resource_by_external_id(&self, external_id: &str) -> Result<Option<Resource>> {
        self.read(|s| s.resources.values().find(|r| r.external_id == external_id).cloned())
    }

    fn apply(&self, changes: ChangeSet) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;

        if !changes.resources.is_empty() {
            let mut resources = state.resources.clone();
            let changed: Vec<ResourceId> = changes.resources.iter().map(|r| r.id.clone()).collect();
            for resource in &changes.resources {
                resources.insert(resource.id.clone(), resource.clone());
            }
            validate_resource_links(&resources, &changed, DEFAULT_MAX_DEPENDENCY_DEPTH)?;
        }

        for baseline in &changes.baselines {
            let latest = state
                .baselines
                .iter()
                .filter(|b| b.program_id == baseline.program_id)
                .map(|b| b.version)
                .max()
                .unwrap_or(0);
            if baseline.version != latest + 1 {
                return Err(Error::storage(format!(
                    "baseline version {} for program {} does not follow {latest}",
                    baseline.version, baseline.program_id
                )));
            }
        }

        if let Some(missing) =
            changes.removed_dependencies.iter().find(|id| !state.dependencies.contains_key(*id))
        {
            return Err(Error::not_found("dependency", missing));
        }

        for program in changes.programs {
            state.programs.insert(program.id.clone(), program);
        }
        for project in changes.projects {
            state.projects.insert(project.id.clone(), project);
        }
        for phase in changes.phases {
            state.phases.insert(phase.id.clone(), phase);
        }
        for resource in changes.resources {
            state.resources.insert(resource.id.clone(), resource);
        }
        for task in changes.tasks {
            state.tasks.insert(task.id.clone(), task);
        }
        for dependency in changes.dependencies {
            state.dependencies.insert(dependency.id.clone(), dependency);
        }
        for id in &changes.removed_dependencies {
            state.dependencies.remove(id);
        }
        state.baselines.extend(changes.baselines);
        state.audit.extend(changes.audit);
        Ok(())
    }

    fn insert_alert(&self, alert: Alert) -> Result<AlertInsert> {
        let mut state = self.state.write().map_err(poison_err)?;
        let key = alert.dedup_key();
        if let Some(existing) =
            state.alerts.values().find(|a| !a.status.is_terminal() && a.dedup_key() == key)
        {
            return Ok(AlertInsert::Existing(existing.clone()));
        }
        state.alerts.insert(alert.id.clone(), alert.clone());
        Ok(AlertInsert::Inserted(alert))
    }

    fn alert(&self, id: &AlertId) -> Result<Option<Alert>> {
        self.read(|s| s.alerts.get(id).cloned())
    }

    fn alerts_with_status(&self, statuses: &[AlertStatus]) -> Result<Vec<Alert>> {
        self.read(|s| s.alerts.values().filter(|a| statuses.contains(&a.status)).cloned().collect())
    }

    fn alerts_for_task(&self, task: &TaskId) -> Result<Vec<Alert>> {
        self.read(|s| s.alerts.values().filter(|a| &a.task_id == task).cloned().collect())
    }

    fn update_alert(&self, alert: &Alert) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let slot = state
            .alerts
            .get_mut(&alert.id)
            .ok_or_else(|| Error::not_found("alert", &alert.id))?;
        *slot = alert.clone();
        Ok(())
    }

    fn insert_token(&self, token: ResponseToken) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.tokens.insert(token.token_hash.clone(), token);
        Ok(())
    }

    fn token(&self, token_hash: &str) -> Result<Option<ResponseToken>> {
        self.read(|s| s.tokens.get(token_hash).cloned())
    }

    fn consume_token(&self, token_hash: &str, at: DateTime<Utc>) -> Result<TokenClaim> {
        let mut state = self.state.write().map_err(poison_err)?;
        let token = state.tokens.get_mut(token_hash).ok_or(Error::TokenNotFound)?;
        if token.revoked || token.used_at.is_some() {
            return Ok(TokenClaim::AlreadyUsed);
        }
        token.used_at = Some(at);
        token.revoked = true;
        Ok(TokenClaim::Claimed(token.clone()))
    }

    fn revoke_token(&self, token_hash: &str) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let token = state.tokens.get_mut(token_hash).ok_or(Error::TokenNotFound)?;
        token.revoked = true;
        Ok(())
    }

    fn response(&self, id: &ResponseId) -> Result<Option<StatusResponse>> {
        self.read(|s| s.responses.get(id).cloned())
    }

    fn response_by_idempotency_key(&self, key: &str) -> Result<Option<StatusResponse>> {
        self.read(|s| s.responses.values().find(|r| r.idempotency_key == key).cloned())
    }

    fn responses_for_task(&self, task: &TaskId) -> Result<Vec<StatusResponse>> {
        self.read(|s| {
            let mut responses: Vec<StatusResponse> =
                s.responses.values().filter(|r| &r.task_id == task).cloned().collect();
            responses.sort_by_key(|r| r.response_version);
            responses
        })
    }

    fn append_response(&self, mut response: StatusResponse) -> Result<StatusResponse> {
        let mut state = self.state.write().map_err(poison_err)?;
        if let Some(existing) =
            state.responses.values().find(|r| r.idempotency_key == response.idempotency_key)
        {
            return Ok(existing.clone());
        }

        let latest_version = state
            .responses
            .values()
            .filter(|r| r.task_id == response.task_id)
            .map(|r| r.response_version)
            .max()
            .unwrap_or(0);
        let version = latest_version + 1;

        for previous in state.responses.values_mut() {
            if previous.task_id == response.task_id && previous.is_latest {
                previous.is_latest = false;
                previous.superseded_by_version = Some(version);
            }
        }

        response.response_version = version;
        response.is_latest = true;
        response.superseded_by_version = None;
        state.responses.insert(response.id.clone(), response.clone());
        Ok(response)
    }

    fn update_response(&self, response: &StatusResponse) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let slot = state
            .responses
            .get_mut(&response.id)
            .ok_or_else(|| Error::not_found("response", &response.id))?;
        *slot = response.clone();
        Ok(())
    }

    fn baselines_for_program(&self, program: &ProgramId) -> Result<Vec<BaselineVersion>> {
        self.read(|s| {
            let mut versions: Vec<BaselineVersion> =
                s.baselines.iter().filter(|b| &b.program_id == program).cloned().collect();
            versions.sort_by_key(|b| b.version);
            versions
        })
    }

    fn record_audit(&self, entries: Vec<AuditEntry>) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.audit.extend(entries);
        Ok(())
    }

    fn audit_log(&self) -> Result<Vec<AuditEntry>> {
        self.read(|s| s.audit.clone())
    }

    fn escalation_policy(&self, program: Option<&ProgramId>) -> Result<EscalationPolicy> {
        self.read(|s| {
            program
                .and_then(|id| s.policies.iter().find(|p| p.program_id.as_ref() == Some(id)))
                .or_else(|| s.policies.iter().find(|p| p.program_id.is_none()))
                .cloned()
                .unwrap_or_default()
        })
    }

    fn set_escalation_policy(&self, policy: EscalationPolicy) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.policies.retain(|p| p.program_id != policy.program_id);
        state.policies.push(policy);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::fixtures::task;
    use crate::model::{AlertType, Availability, ReportedStatus, Urgency};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    fn at() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_770_000_000, 0).unwrap()
    }

    fn alert(id: &str, task: &str, status: AlertStatus) -> Alert {
        Alert {
            id: AlertId::new(id),
            task_id: TaskId::new(task),
            program_id: ProgramId::new("prog-1"),
            deadline: d(10),
            alert_type: AlertType::StatusCheck,
            intended_recipient_id: None,
            actual_recipient_id: None,
            escalation_level: 0,
            status,
            urgency: Urgency::Low,
            scheduled_send_at: at(),
            sent_at: None,
            delivered_at: None,
            opened_at: None,
            responded_at: None,
            expired_at: None,
            cancelled_at: None,
            escalation_timeout_at: None,
            parent_alert_id: None,
            requires_manual_intervention: false,
            escalation_reason: None,
            skipped_recipients: Vec::new(),
            last_error: None,
            retry_count: 0,
            delivery_id: None,
            related_response_id: None,
            reminder_sent_at: None,
            created_at: at(),
        }
    }

    fn response(id: &str, key: &str) -> StatusResponse {
        StatusResponse {
            id: ResponseId::new(id),
            alert_id: AlertId::new("alert-1"),
            task_id: TaskId::new("A"),
            responder_id: ResourceId::new("dev"),
            response_version: 0,
            is_latest: false,
            superseded_by_version: None,
            reported_status: ReportedStatus::OnTrack,
            proposed_new_date: None,
            delay_days: None,
            reason: None,
            comment: None,
            started_on: None,
            approval: None,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            processed: false,
            processed_at: None,
            idempotency_key: key.to_string(),
            submitted_at: at(),
        }
    }

    #[test]
    fn alert_insert_returns_existing_open_alert() {
        let store = InMemoryStore::new();
        let first = store.insert_alert(alert("alert-1", "A", AlertStatus::Pending)).unwrap();
        let second = store.insert_alert(alert("alert-2", "A", AlertStatus::Pending)).unwrap();

        assert!(first.is_inserted());
        assert_eq!(second, AlertInsert::Existing(first.alert().clone()));
    }

    #[test]
    fn terminal_alerts_do_not_block_new_ones() {
        let store = InMemoryStore::new();
        store.insert_alert(alert("alert-1", "A", AlertStatus::Expired)).unwrap();
        let outcome = store.insert_alert(alert("alert-2", "A", AlertStatus::Pending)).unwrap();
        assert!(outcome.is_inserted());
    }

    #[test]
    fn token_can_be_claimed_once() {
        let store = InMemoryStore::new();
        store
            .insert_token(ResponseToken {
                token_hash: "h".into(),
                alert_id: AlertId::new("alert-1"),
                task_id: TaskId::new("A"),
                resource_id: ResourceId::new("dev"),
                expires_at: at(),
                used_at: None,
                revoked: false,
                created_at: at(),
            })
            .unwrap();

        assert!(matches!(store.consume_token("h", at()).unwrap(), TokenClaim::Claimed(_)));
        assert_eq!(store.consume_token("h", at()).unwrap(), TokenClaim::AlreadyUsed);
        assert!(matches!(store.revoke_token("missing"), Err(Error::TokenNotFound)));
        assert!(matches!(store.consume_token("missing", at()), Err(Error::TokenNotFound)));
    }

    #[test]
    fn appended_responses_are_versioned() {
        let store = InMemoryStore::new();
        let first = store.append_response(response("r1", "k1")).unwrap();
        let second = store.append_response(response("r2", "k2")).unwrap();

        assert_eq!(first.response_version, 1);
        assert_eq!(second.response_version, 2);
        let stored_first = store.response(&first.id).unwrap().unwrap();
        assert!(!stored_first.is_latest);
        assert_eq!(stored_first.superseded_by_version, Some(2));
    }

    #[test]
    fn duplicate_idempotency_key_returns_existing() {
        let store = InMemoryStore::new();
        let first = store.append_response(response("r1", "same")).unwrap();
        let again = store.append_response(response("r2", "same")).unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(store.responses_for_task(&TaskId::new("A")).unwrap().len(), 1);
    }

    #[test]
    fn rejected_change_set_writes_nothing() {
        let store = InMemoryStore::new();
        let looping = Resource {
            id: ResourceId::new("dev"),
            external_id: "dev".into(),
            name: "Dev".into(),
            email: None,
            timezone: "UTC".into(),
            country_code: None,
            max_utilization: 100,
            availability: Availability::Active,
            manager_id: Some(ResourceId::new("dev")),
            backup_resource_id: None,
        };
        let changes = ChangeSet {
            tasks: vec![task("A", d(2), d(5))],
            resources: vec![looping],
            ..ChangeSet::default()
        };

        assert!(store.apply(changes).is_err());
        assert!(store.task(&TaskId::new("A")).unwrap().is_none());
    }

    #[test]
    fn ghost_query_skips_seen_and_cancelled() {
        let store = InMemoryStore::new();
        let mut cancelled = task("C", d(2), d(5));
        cancelled.status = WorkStatus::Cancelled;
        store
            .apply(ChangeSet {
                tasks: vec![task("A", d(2), d(5)), task("B", d(2), d(5)), cancelled],
                ..ChangeSet::default()
            })
            .unwrap();

        let seen: HashSet<String> = ["A".to_string()].into_iter().collect();
        let ghosts = store.ghost_tasks(&ProgramId::new("prog-1"), &seen).unwrap();
        assert_eq!(ghosts.len(), 1);
        assert_eq!(ghosts[0].external_id, "B");
    }

    #[test]
    fn policy_falls_back_to_global_then_default() {
        let store = InMemoryStore::new();
        let program = ProgramId::new("prog-1");
        assert_eq!(store.escalation_policy(Some(&program)).unwrap(), EscalationPolicy::default());

        let global = EscalationPolicy { auto_approve_delay_up_to_days: 2, ..Default::default() };
        store.set_escalation_policy(global.clone()).unwrap();
        assert_eq!(store.escalation_policy(Some(&program)).unwrap(), global);

        let scoped = EscalationPolicy {
            program_id: Some(program.clone()),
            auto_approve_delay_up_to_days: 5,
            ..Default::default()
        };
        store.set_escalation_policy(scoped.clone()).unwrap();
        assert_eq!(store.escalation_policy(Some(&program)).unwrap(), scoped);
    }
}
