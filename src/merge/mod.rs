//! Three-way merge of an import batch into the work graph.
//!
//! Imports own the baseline; the scheduler and approvals own the forecast;
//! people own reality. A merge therefore inserts new tasks, rewrites only the
//! baseline of known tasks, and soft-cancels (or flags) tasks the import no
//! longer mentions. Everything is computed against the store, collected into
//! one [`ChangeSet`], and written atomically under the program lock, followed
//! by a critical path recalculation.

pub mod batch;
mod dependencies;
mod hierarchy;
mod tasks;

pub use batch::{
    DependencyRecord, ImportBatch, PhaseRecord, ProgramRecord, ProjectRecord, ResourceRecord,
    TaskRecord,
};
pub use dependencies::acknowledge_dependency_removal;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::model::{
    AuditAction, AuditEntry, BaselineTask, BaselineVersion, ChangeSource, EntityKind, ProgramId,
    ResourceId, Task, TaskId, WorkStatus,
};
use crate::schedule::critical_path::{recalculate_locked, CriticalPathReport};
use crate::store::ChangeSet;

/// What the merge did with one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeAction {
    /// First sighting; inserted.
    Created,
    /// Baseline fields changed.
    Updated,
    /// Nothing to change.
    Preserved,
    /// Missing from the import and never started; soft-cancelled.
    Cancelled,
    /// Missing from the import but has progress; flagged for review.
    Flagged,
}

/// Per-task merge outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    /// Task external id.
    pub external_id: String,
    /// What happened.
    pub action: MergeAction,
}

/// Result of one import.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    /// Program the batch was merged into.
    pub program_id: Option<ProgramId>,
    /// Tasks inserted.
    pub created: usize,
    /// Tasks whose baseline changed.
    pub updated: usize,
    /// Tasks left as they were.
    pub preserved: usize,
    /// Ghost tasks cancelled.
    pub cancelled: usize,
    /// Ghost tasks flagged for review.
    pub flagged: usize,
    /// Resources inserted.
    pub resources_created: usize,
    /// Resources changed.
    pub resources_updated: usize,
    /// Dependencies inserted.
    pub dependencies_created: usize,
    /// Dependencies whose type or lag changed.
    pub dependencies_updated: usize,
    /// Baseline version recorded by this import.
    pub baseline_version: Option<u32>,
    /// Critical path after the merge, when it could be computed.
    pub critical_path: Option<CriticalPathReport>,
    /// Per-task outcomes in processing order.
    pub outcomes: Vec<TaskOutcome>,
    /// Non-fatal observations.
    pub warnings: Vec<String>,
    /// Skipped records.
    pub errors: Vec<String>,
}

impl BatchSummary {
    fn record(&mut self, external_id: &str, action: MergeAction) {
        match action {
            MergeAction::Created => self.created += 1,
            MergeAction::Updated => self.updated += 1,
            MergeAction::Preserved => self.preserved += 1,
            MergeAction::Cancelled => self.cancelled += 1,
            MergeAction::Flagged => self.flagged += 1,
        }
        self.outcomes.push(TaskOutcome { external_id: external_id.to_string(), action });
    }
}

/// Working state of one merge.
struct Merge<'a> {
    ctx: &'a ServiceContext,
    now: DateTime<Utc>,
    program_id: ProgramId,
    reason: Option<String>,
    changes: ChangeSet,
    summary: BatchSummary,
    /// Batch resources by external id.
    resources: HashMap<String, ResourceId>,
    /// Tasks named by the batch, by external id.
    tasks: HashMap<String, TaskId>,
}

impl<'a> Merge<'a> {
    fn new(ctx: &'a ServiceContext, program_id: ProgramId, reason: Option<String>) -> Self {
        Self {
            ctx,
            now: ctx.clock.now(),
            summary: BatchSummary {
                program_id: Some(program_id.clone()),
                ..BatchSummary::default()
            },
            program_id,
            reason,
            changes: ChangeSet::default(),
            resources: HashMap::new(),
            tasks: HashMap::new(),
        }
    }

    fn entry(&self, kind: EntityKind, id: impl ToString, action: AuditAction) -> AuditEntry {
        let entry = AuditEntry::new(kind, id, action, ChangeSource::Import, self.now);
        match &self.reason {
            Some(reason) => entry.because(reason.clone()),
            None => entry,
        }
    }

    fn audit(&mut self, entry: AuditEntry) {
        self.changes.audit.push(entry);
    }

    fn warn(&mut self, message: String) {
        self.summary.warnings.push(message);
    }

    fn error(&mut self, record: &str, message: impl Into<String>) {
        self.summary.errors.push(Error::validation(record, message).to_string());
    }

    fn new_id(&self, kind: &str) -> String {
        self.ctx.id_gen.generate_id(kind)
    }

    /// The program's tasks as they will be after this merge.
    fn merged_tasks(&self) -> Result<Vec<Task>> {
        let mut by_id: HashMap<TaskId, Task> = self
            .ctx
            .store
            .tasks_for_program(&self.program_id)?
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        for task in &self.changes.tasks {
            by_id.insert(task.id.clone(), task.clone());
        }
        let mut tasks: Vec<Task> = by_id.into_values().collect();
        tasks.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        Ok(tasks)
    }

    fn record_baseline(&mut self, source: Option<&str>) -> Result<()> {
        let latest = self
            .ctx
            .store
            .baselines_for_program(&self.program_id)?
            .iter()
            .map(|b| b.version)
            .max()
            .unwrap_or(0);
        let tasks: Vec<Task> = self
            .merged_tasks()?
            .into_iter()
            .filter(|t| t.status != WorkStatus::Cancelled)
            .collect();
        let version = latest + 1;
        let baseline = BaselineVersion {
            program_id: self.program_id.clone(),
            version,
            source: source.unwrap_or("import").to_string(),
            start_date: tasks.iter().map(|t| t.planned_start).min(),
            end_date: tasks.iter().map(|t| t.planned_end).max(),
            task_count: tasks.len(),
            total_effort_hours: tasks.iter().filter_map(|t| t.planned_effort_hours).sum(),
            tasks: Some(
                tasks
                    .iter()
                    .map(|t| BaselineTask {
                        task_id: t.id.clone(),
                        external_id: t.external_id.clone(),
                        planned_start: t.planned_start,
                        planned_end: t.planned_end,
                    })
                    .collect(),
            ),
            created_at: self.now,
        };
        let entry = self
            .entry(EntityKind::Baseline, &self.program_id, AuditAction::Created)
            .field("version", None, Some(version.to_string()));
        self.audit(entry);
        self.changes.baselines.push(baseline);
        self.summary.baseline_version = Some(version);
        Ok(())
    }
}

/// Merges one import batch into its program.
///
/// Record-level problems skip the record and are listed in
/// [`BatchSummary::errors`]; if more records fail than
/// `settings.max_import_errors`, nothing is written.
///
/// # Errors
///
/// Returns [`Error::ImportAborted`] above the error threshold,
/// [`Error::ResourceHierarchy`] if resource links would form a loop, or a
/// storage error.
#[instrument(skip_all, fields(program = %batch.program.external_id, tasks = batch.tasks.len()))]
pub fn merge_import(ctx: &ServiceContext, batch: &ImportBatch) -> Result<BatchSummary> {
    if batch.program.external_id.trim().is_empty() {
        return Err(Error::validation("program", "program external id is empty"));
    }
    ctx.locks.with_import(&batch.program.external_id, || merge_locked(ctx, batch))
}

fn merge_locked(ctx: &ServiceContext, batch: &ImportBatch) -> Result<BatchSummary> {
    let existing = ctx.store.program_by_external_id(&batch.program.external_id)?;
    let program_id = existing
        .as_ref()
        .map_or_else(|| ProgramId::new(ctx.id_gen.generate_id("program")), |p| p.id.clone());

    ctx.locks.with_program(&program_id, || {
        let mut merge = Merge::new(ctx, program_id.clone(), batch.source.clone());
        merge.sync_resources(&batch.resources)?;
        merge.sync_program(&batch.program, existing)?;
        let phases = merge.sync_structure(&batch.projects, &batch.phases)?;
        merge.merge_tasks(&batch.tasks, &phases)?;
        merge.sync_dependencies(&batch.dependencies)?;
        if batch.track_baseline {
            merge.record_baseline(batch.source.as_deref())?;
        }

        let Merge { changes, mut summary, .. } = merge;
        let threshold = ctx.settings.max_import_errors;
        if summary.errors.len() > threshold {
            warn!(errors = summary.errors.len(), threshold, "import aborted");
            return Err(Error::ImportAborted {
                count: summary.errors.len(),
                threshold,
                errors: summary.errors,
            });
        }

        if !changes.is_empty() {
            ctx.store.apply(changes)?;
        }
        match recalculate_locked(ctx, &program_id) {
            Ok(report) => summary.critical_path = Some(report),
            Err(err @ (Error::CycleDetected { .. } | Error::DepthExceeded { .. })) => {
                summary.warnings.push(format!("critical path not recalculated: {err}"));
            }
            Err(err) => return Err(err),
        }

        info!(
            created = summary.created,
            updated = summary.updated,
            preserved = summary.preserved,
            cancelled = summary.cancelled,
            flagged = summary.flagged,
            warnings = summary.warnings.len(),
            errors = summary.errors.len(),
            "import merged"
        );
        Ok(summary)
    })
}
