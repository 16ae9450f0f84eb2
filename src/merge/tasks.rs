//! Task merge and ghost check.

use std::collections::HashSet;

use super::batch::TaskRecord;
use super::hierarchy::PhaseIndex;
use super::{Merge, MergeAction};
use crate::error::Result;
use crate::model::{AuditAction, EntityKind, PhaseId, ResourceId, Task, TaskId, WorkStatus};

/// Reason stored on tasks cancelled by the ghost check.
pub(super) const GHOST_CANCELLATION_REASON: &str = "missing from import";

impl Merge<'_> {
    /// Inserts new tasks, rewrites the baseline of known ones, then runs the
    /// ghost check against every external id the batch mentions.
    pub(super) fn merge_tasks(
        &mut self,
        records: &[TaskRecord],
        phases: &PhaseIndex,
    ) -> Result<()> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut keys = HashSet::new();

        for record in records {
            seen.insert(record.external_id.clone());
            if let Err(message) = record.check() {
                self.error(&record.external_id, message);
                continue;
            }
            let Some(phase_id) = self.resolve_phase(phases, &record.project, &record.phase)? else {
                self.error(
                    &record.external_id,
                    format!("phase {}/{} not found", record.project, record.phase),
                );
                continue;
            };
            if !keys.insert((phase_id.clone(), record.external_id.clone())) {
                self.error(&record.external_id, "duplicate task in batch");
                continue;
            }
            let resource = self.task_resource(record)?;

            match self.ctx.store.task_by_key(&phase_id, &record.external_id)? {
                None => self.insert_task(record, phase_id, resource.flatten()),
                Some(existing) => self.update_baseline(record, existing, resource),
            }
        }

        self.ghost_check(&seen)
    }

    /// `None` when the record names a resource that cannot be found, which
    /// keeps the stored assignment.
    fn task_resource(&mut self, record: &TaskRecord) -> Result<Option<Option<ResourceId>>> {
        let Some(external_id) = &record.resource else {
            return Ok(Some(None));
        };
        match self.resolve_resource(external_id)? {
            Some(id) => Ok(Some(Some(id))),
            None => {
                self.warn(format!(
                    "Task {}: Resource {external_id} not found, assignment skipped",
                    record.external_id
                ));
                Ok(None)
            }
        }
    }

    fn insert_task(
        &mut self,
        record: &TaskRecord,
        phase_id: PhaseId,
        resource: Option<ResourceId>,
    ) {
        let task = Task {
            id: TaskId::new(self.new_id("task")),
            external_id: record.external_id.clone(),
            phase_id,
            program_id: self.program_id.clone(),
            name: record.name.clone(),
            planned_start: record.planned_start,
            planned_end: record.planned_end,
            current_start: record.planned_start,
            current_end: record.planned_end,
            actual_start: None,
            actual_end: None,
            planned_effort_hours: record.planned_effort_hours,
            revenue_impact: record.revenue_impact,
            strategic_importance: record.strategic_importance.clone(),
            status: WorkStatus::NotStarted,
            completion_percent: 0,
            slack_days: None,
            is_critical_path: false,
            flag_for_review: false,
            review_message: None,
            resource_id: resource,
            cancellation_reason: None,
            created_at: self.now,
            updated_at: self.now,
        };
        let entry = self.entry(EntityKind::Task, &task.id, AuditAction::Created);
        self.audit(entry);
        self.tasks.insert(task.external_id.clone(), task.id.clone());
        self.summary.record(&task.external_id, MergeAction::Created);
        self.changes.tasks.push(task);
    }

    /// Rewrites baseline and metadata only. Forecast, status, completion and
    /// actuals are carried over untouched.
    fn update_baseline(
        &mut self,
        record: &TaskRecord,
        existing: Task,
        resource: Option<Option<ResourceId>>,
    ) {
        self.tasks.insert(existing.external_id.clone(), existing.id.clone());
        let mut task = existing.clone();
        task.name.clone_from(&record.name);
        task.planned_start = record.planned_start;
        task.planned_end = record.planned_end;
        task.planned_effort_hours = record.planned_effort_hours;
        task.revenue_impact = record.revenue_impact;
        task.strategic_importance.clone_from(&record.strategic_importance);
        if let Some(resource) = resource {
            task.resource_id = resource;
        }

        if task == existing {
            self.summary.record(&task.external_id, MergeAction::Preserved);
            return;
        }

        if existing.status == WorkStatus::Cancelled {
            self.warn(format!(
                "Task {} is cancelled; baseline updated but the task was not reactivated",
                task.external_id
            ));
        }
        if task.planned_start > task.current_start {
            self.warn(format!(
                "Task {}: New baseline start ({}) is later than current forecast ({}). \
                 Recalculation will adjust current dates.",
                task.external_id, task.planned_start, task.current_start
            ));
        }
        if task.planned_end > task.current_end {
            self.warn(format!(
                "Task {}: New baseline end ({}) is later than current end ({}). \
                 Recalculation will adjust current dates.",
                task.external_id, task.planned_end, task.current_end
            ));
        }

        let mut entries = Vec::new();
        if existing.planned_start != task.planned_start {
            entries.push((
                "planned_start",
                existing.planned_start.to_string(),
                task.planned_start.to_string(),
            ));
        }
        if existing.planned_end != task.planned_end {
            entries.push((
                "planned_end",
                existing.planned_end.to_string(),
                task.planned_end.to_string(),
            ));
        }
        if existing.name != task.name {
            entries.push(("name", existing.name.clone(), task.name.clone()));
        }
        if existing.resource_id != task.resource_id {
            let show = |r: &Option<ResourceId>| {
                r.as_ref().map_or_else(String::new, ToString::to_string)
            };
            entries.push(("resource_id", show(&existing.resource_id), show(&task.resource_id)));
        }
        if entries.is_empty() {
            let entry = self.entry(EntityKind::Task, &task.id, AuditAction::Updated);
            self.audit(entry);
        }
        for (field, old, new) in entries {
            let entry = self
                .entry(EntityKind::Task, &task.id, AuditAction::Updated)
                .changed(field, old, new);
            self.audit(entry);
        }

        task.updated_at = self.now;
        self.summary.record(&task.external_id, MergeAction::Updated);
        self.changes.tasks.push(task);
    }

    /// Handles stored tasks the batch no longer mentions: never-started ones
    /// are cancelled, ones with progress are flagged, completed ones are kept.
    fn ghost_check(&mut self, seen: &HashSet<String>) -> Result<()> {
        let mut ghosts = self.ctx.store.ghost_tasks(&self.program_id, seen)?;
        ghosts.sort_by(|a, b| a.external_id.cmp(&b.external_id));

        for mut task in ghosts {
            if task.status == WorkStatus::Completed {
                self.warn(format!(
                    "Task {} was removed from the import but preserved (status: Completed). \
                     Historical data retained.",
                    task.external_id
                ));
                self.summary.record(&task.external_id, MergeAction::Preserved);
                continue;
            }

            if task.has_progress() {
                let message = format!(
                    "Task {} was removed from the import but is {}% complete (status: {}). \
                     Requires PM decision to cancel or continue.",
                    task.external_id,
                    task.completion_percent,
                    task.status.label()
                );
                let already_flagged = task.review_message.as_deref() == Some(message.as_str());
                if task.flag_for_review && already_flagged {
                    self.summary.record(&task.external_id, MergeAction::Preserved);
                    continue;
                }
                self.warn(format!("REQUIRES REVIEW: {message}"));
                let entry = self
                    .entry(EntityKind::Task, &task.id, AuditAction::Flagged)
                    .changed("flag_for_review", task.flag_for_review, true);
                self.audit(entry);
                task.flag(message);
                task.updated_at = self.now;
                self.summary.record(&task.external_id, MergeAction::Flagged);
                self.changes.tasks.push(task);
                continue;
            }

            self.warn(format!(
                "Task {} was removed from the import and has been cancelled (was {}).",
                task.external_id,
                task.status.label()
            ));
            let entry = self
                .entry(EntityKind::Task, &task.id, AuditAction::Cancelled)
                .changed("status", task.status.label(), WorkStatus::Cancelled.label());
            self.audit(entry);
            task.status = WorkStatus::Cancelled;
            task.cancellation_reason = Some(GHOST_CANCELLATION_REASON.to_string());
            task.updated_at = self.now;
            self.summary.record(&task.external_id, MergeAction::Cancelled);
            self.changes.tasks.push(task);
        }
        Ok(())
    }
}
