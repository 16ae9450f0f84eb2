//! Forward-only date propagation.
//!
//! A bounded fixpoint: each pass pushes unstarted tasks to the earliest start
//! their predecessors allow, never earlier than their stored start. Passes run
//! in topological order, so a well-formed graph settles in two passes; the
//! cap only matters for malformed data.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::{earliest_start, load_graph};
use crate::context::ServiceContext;
use crate::error::Result;
use crate::model::{AuditAction, AuditEntry, ChangeSource, EntityKind, ProgramId, Task};
use crate::store::ChangeSet;

/// Outcome of a propagation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropagationReport {
    /// Passes executed, including the final no-change pass.
    pub iterations: usize,
    /// Number of distinct tasks moved.
    pub tasks_shifted: usize,
    /// `false` when the pass cap was reached while dates were still moving.
    pub converged: bool,
    /// Total shift in days per moved task, keyed by external id.
    pub shifts: BTreeMap<String, i64>,
}

/// Pushes successors of moved tasks forward until nothing changes.
///
/// # Errors
///
/// Returns a structural error (cycle or depth cap) before moving anything,
/// or a storage error.
#[instrument(skip(ctx), fields(program = %program))]
pub fn propagate_dependency_dates(
    ctx: &ServiceContext,
    program: &ProgramId,
) -> Result<PropagationReport> {
    ctx.locks.with_program(program, || propagate_locked(ctx, program))
}

pub(crate) fn propagate_locked(
    ctx: &ServiceContext,
    program: &ProgramId,
) -> Result<PropagationReport> {
    let (mut graph, order) = load_graph(ctx, program)?;
    let original: Vec<Task> = graph.tasks().to_vec();
    let cap = ctx.settings.propagation_max_iterations;

    let mut iterations = 0;
    let mut converged = false;
    while iterations < cap {
        iterations += 1;
        let mut changed = false;
        for &idx in &order {
            let task = graph.task(idx);
            if task.actual_start.is_some() || !task.is_open() {
                continue;
            }
            let duration = task.duration_days();
            let required = graph
                .predecessors(idx)
                .map(|edge| {
                    let pred = graph.task(edge.from);
                    let (start, end) = (pred.current_start, pred.current_end);
                    earliest_start(edge.kind, edge.lag, start, end, duration, true)
                })
                .fold(task.current_start, NaiveDate::max);
            let delta = (required - task.current_start).num_days();
            if delta > 0 {
                let task = graph.task_mut(idx);
                task.current_start += Duration::days(delta);
                task.current_end += Duration::days(delta);
                changed = true;
            }
        }
        if !changed {
            converged = true;
            break;
        }
    }

    let now = ctx.clock.now();
    let mut changes = ChangeSet::default();
    let mut shifts = BTreeMap::new();
    for (before, after) in original.iter().zip(graph.tasks()) {
        if before.current_start == after.current_start {
            continue;
        }
        let days = (after.current_start - before.current_start).num_days();
        shifts.insert(after.external_id.clone(), days);
        changes.audit.push(
            AuditEntry::new(
                EntityKind::Task,
                &after.id,
                AuditAction::Rescheduled,
                ChangeSource::Scheduler,
                now,
            )
            .changed("current_start", before.current_start, after.current_start)
            .because(format!("dependency propagation shifted by {days} day(s)")),
        );
        let mut updated = after.clone();
        updated.updated_at = now;
        changes.tasks.push(updated);
    }

    let tasks_shifted = changes.tasks.len();
    if !changes.is_empty() {
        ctx.store.apply(changes)?;
    }
    if converged {
        info!(iterations, tasks_shifted, "dependency dates propagated");
    } else {
        warn!(iterations, tasks_shifted, "propagation hit its pass cap without converging");
    }

    Ok(PropagationReport { iterations, tasks_shifted, converged, shifts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::model::{DependencyType, WorkStatus};
    use crate::test_support::{at, context_at, date, fs, link, march_task, seed, stored, PROGRAM};

    fn program() -> ProgramId {
        ProgramId::new(PROGRAM)
    }

    fn ctx() -> ServiceContext {
        context_at(at(3, 1, 8)).0
    }

    #[test]
    fn ten_task_chain_shifts_by_exactly_five_days() {
        let ctx = ctx();
        let ids: Vec<String> = (1..=10).map(|i| format!("T{i:02}")).collect();
        let tasks: Vec<Task> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let start = 1 + u32::try_from(i).unwrap() * 2;
                march_task(id, start, start + 1)
            })
            .collect();
        let deps = ids.windows(2).map(|w| fs(&w[0], &w[1])).collect();
        seed(&ctx, tasks, deps);

        let mut first = stored(&ctx, "T01");
        first.current_end += Duration::days(5);
        ctx.store.apply(ChangeSet { tasks: vec![first], ..ChangeSet::default() }).unwrap();

        let report = propagate_dependency_dates(&ctx, &program()).unwrap();

        assert!(report.converged);
        assert!(report.iterations <= 10);
        assert_eq!(report.tasks_shifted, 9);
        for (i, id) in ids.iter().enumerate().skip(1) {
            let start = 1 + u32::try_from(i).unwrap() * 2;
            let task = stored(&ctx, id);
            assert_eq!(task.current_start, date(3, start + 5), "{id}");
            assert_eq!(task.current_end, date(3, start + 6), "{id}");
            assert_eq!(report.shifts[id], 5);
        }
    }

    #[test]
    fn started_and_completed_tasks_stay_put() {
        let ctx = ctx();
        let mut b = march_task("B", 5, 7);
        b.actual_start = Some(date(3, 5));
        let mut c = march_task("C", 5, 7);
        c.status = WorkStatus::Completed;
        seed(&ctx, vec![march_task("A", 2, 10), b, c], vec![fs("A", "B"), fs("A", "C")]);

        let report = propagate_dependency_dates(&ctx, &program()).unwrap();

        assert_eq!(report.tasks_shifted, 0);
        assert_eq!(report.iterations, 1);
        assert_eq!(stored(&ctx, "B").current_start, date(3, 5));
        assert_eq!(stored(&ctx, "C").current_start, date(3, 5));
    }

    #[test]
    fn never_pulls_tasks_earlier() {
        let ctx = ctx();
        seed(&ctx, vec![march_task("A", 2, 4), march_task("B", 20, 22)], vec![fs("A", "B")]);

        let report = propagate_dependency_dates(&ctx, &program()).unwrap();

        assert_eq!(report.tasks_shifted, 0);
        assert_eq!(stored(&ctx, "B").current_start, date(3, 20));
    }

    #[test]
    fn lag_and_lead_are_applied() {
        let ctx = ctx();
        seed(
            &ctx,
            vec![march_task("A", 2, 10), march_task("B", 2, 4), march_task("C", 2, 4)],
            vec![link("A", "B", DependencyType::FS, 2), link("A", "C", DependencyType::FS, -3)],
        );

        propagate_dependency_dates(&ctx, &program()).unwrap();

        assert_eq!(stored(&ctx, "B").current_start, date(3, 13));
        assert_eq!(stored(&ctx, "C").current_start, date(3, 8));
        assert_eq!(stored(&ctx, "C").current_end, date(3, 10));
    }

    #[test]
    fn moves_are_audited_as_scheduler_changes() {
        let ctx = ctx();
        seed(&ctx, vec![march_task("A", 2, 10), march_task("B", 2, 4)], vec![fs("A", "B")]);

        propagate_dependency_dates(&ctx, &program()).unwrap();

        let log = ctx.store.audit_log().unwrap();
        let entry = log.iter().find(|e| e.entity_id == "B").unwrap();
        assert_eq!(entry.source, ChangeSource::Scheduler);
        assert_eq!(entry.action, AuditAction::Rescheduled);
        assert_eq!(entry.old_value.as_deref(), Some("2026-03-02"));
        assert_eq!(entry.new_value.as_deref(), Some("2026-03-11"));
    }

    #[test]
    fn cycle_reschedules_nothing() {
        let ctx = ctx();
        seed(
            &ctx,
            vec![march_task("A", 2, 10), march_task("B", 2, 4), march_task("C", 2, 4)],
            vec![fs("A", "B"), fs("B", "C"), fs("C", "B")],
        );

        let err = propagate_dependency_dates(&ctx, &program()).unwrap_err();

        assert!(matches!(err, Error::CycleDetected { .. }));
        assert_eq!(stored(&ctx, "B").current_start, date(3, 2));
    }

    #[test]
    fn pass_cap_reports_non_convergence() {
        let ctx = ctx();
        let mut settings = ctx.settings.clone();
        settings.propagation_max_iterations = 1;
        let ctx = ctx.with_settings(settings);
        seed(&ctx, vec![march_task("A", 2, 10), march_task("B", 2, 4)], vec![fs("A", "B")]);

        let report = propagate_dependency_dates(&ctx, &program()).unwrap();

        assert!(!report.converged);
        assert_eq!(report.iterations, 1);
        assert_eq!(stored(&ctx, "B").current_start, date(3, 11));
    }
}
