//! Dependency sync and explicit removal.
//!
//! Imports insert or update dependencies but never delete them: a
//! dependency the import stopped mentioning is reported as stale until
//! someone acknowledges its removal.

use std::collections::{HashMap, HashSet};

use tracing::{info, instrument};

use super::batch::DependencyRecord;
use super::Merge;
use crate::audit::SYSTEM_ACTOR;
use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::model::{
    AuditAction, AuditEntry, ChangeSource, Dependency, DependencyId, EntityKind, ProgramId, TaskId,
};
use crate::store::ChangeSet;

impl Merge<'_> {
    /// Inserts or updates the batch's dependencies and warns about stored
    /// ones the batch no longer lists.
    pub(super) fn sync_dependencies(&mut self, records: &[DependencyRecord]) -> Result<()> {
        let stored_tasks = self.ctx.store.tasks_for_program(&self.program_id)?;
        let mut by_external: HashMap<&str, Vec<&TaskId>> = HashMap::new();
        for task in &stored_tasks {
            by_external.entry(task.external_id.as_str()).or_default().push(&task.id);
        }
        let names: HashMap<&TaskId, &str> =
            stored_tasks.iter().map(|t| (&t.id, t.external_id.as_str())).collect();

        let existing: HashMap<(TaskId, TaskId), Dependency> = self
            .ctx
            .store
            .dependencies_for_program(&self.program_id)?
            .into_iter()
            .map(|d| ((d.predecessor_id.clone(), d.successor_id.clone()), d))
            .collect();
        let mut listed: HashSet<(TaskId, TaskId)> = HashSet::new();

        for record in records {
            let label = format!("{} -> {}", record.predecessor, record.successor);
            if record.predecessor == record.successor {
                self.error(&label, "task cannot depend on itself");
                continue;
            }
            let predecessor = match self.resolve_task(&by_external, &record.predecessor) {
                Ok(id) => id,
                Err(message) => {
                    self.error(&label, message);
                    continue;
                }
            };
            let successor = match self.resolve_task(&by_external, &record.successor) {
                Ok(id) => id,
                Err(message) => {
                    self.error(&label, message);
                    continue;
                }
            };
            let key = (predecessor, successor);
            if !listed.insert(key.clone()) {
                self.error(&label, "duplicate dependency in batch");
                continue;
            }

            match existing.get(&key) {
                Some(dep) if dep.kind == record.kind && dep.lag_days == record.lag_days => {}
                Some(dep) => {
                    let mut updated = dep.clone();
                    updated.kind = record.kind;
                    updated.lag_days = record.lag_days;
                    let entry = self
                        .entry(EntityKind::Dependency, &updated.id, AuditAction::Updated)
                        .changed(
                            "type_lag",
                            format!("{:?}{:+}", dep.kind, dep.lag_days),
                            format!("{:?}{:+}", updated.kind, updated.lag_days),
                        );
                    self.audit(entry);
                    self.summary.dependencies_updated += 1;
                    self.changes.dependencies.push(updated);
                }
                None => {
                    let dep = Dependency {
                        id: DependencyId::new(self.new_id("dependency")),
                        predecessor_id: key.0,
                        successor_id: key.1,
                        kind: record.kind,
                        lag_days: record.lag_days,
                    };
                    let entry = self.entry(EntityKind::Dependency, &dep.id, AuditAction::Created);
                    self.audit(entry);
                    self.summary.dependencies_created += 1;
                    self.changes.dependencies.push(dep);
                }
            }
        }

        let mut stale: Vec<&Dependency> =
            existing.iter().filter(|(key, _)| !listed.contains(*key)).map(|(_, dep)| dep).collect();
        stale.sort_by(|a, b| a.id.cmp(&b.id));
        for dep in stale {
            let from =
                names.get(&dep.predecessor_id).copied().unwrap_or(dep.predecessor_id.as_str());
            let to = names.get(&dep.successor_id).copied().unwrap_or(dep.successor_id.as_str());
            self.warn(format!(
                "Dependency {from} -> {to} ({}) is no longer in the import; \
                 acknowledge its removal to delete it",
                dep.id
            ));
        }
        Ok(())
    }

    /// Finds a task by external id: tasks named in this batch first, then
    /// stored tasks, which must be unambiguous.
    fn resolve_task(
        &self,
        stored: &HashMap<&str, Vec<&TaskId>>,
        external_id: &str,
    ) -> std::result::Result<TaskId, String> {
        if let Some(id) = self.tasks.get(external_id) {
            return Ok(id.clone());
        }
        match stored.get(external_id).map(Vec::as_slice) {
            Some([id]) => Ok((*id).clone()),
            Some([]) | None => Err(format!("task {external_id} not found")),
            Some(_) => Err(format!("task {external_id} is ambiguous across phases")),
        }
    }
}

/// Deletes a dependency the import no longer lists.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the dependency does not belong to
/// `program`, or a storage error.
#[instrument(skip(ctx), fields(program = %program, dependency = %dependency))]
pub fn acknowledge_dependency_removal(
    ctx: &ServiceContext,
    program: &ProgramId,
    dependency: &DependencyId,
    actor: Option<&str>,
) -> Result<Dependency> {
    ctx.locks.with_program(program, || {
        let dep = ctx
            .store
            .dependencies_for_program(program)?
            .into_iter()
            .find(|d| &d.id == dependency)
            .ok_or_else(|| Error::not_found("dependency", dependency))?;

        let entry = AuditEntry::new(
            EntityKind::Dependency,
            &dep.id,
            AuditAction::Removed,
            ChangeSource::Manual,
            ctx.clock.now(),
        )
        .field(
            "predecessor_successor",
            Some(format!("{} -> {}", dep.predecessor_id, dep.successor_id)),
            None,
        )
        .by(actor.unwrap_or(SYSTEM_ACTOR))
        .because("removal acknowledged");
        ctx.store.apply(ChangeSet {
            removed_dependencies: vec![dep.id.clone()],
            audit: vec![entry],
            ..ChangeSet::default()
        })?;
        info!("dependency removed");
        Ok(dep)
    })
}
