//! Forward and backward passes over the work graph.
//!
//! Early and late dates use exclusive finishes: a task running
//! `[start, end)` has `early_finish = early_start + duration`.

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::{info, instrument};

use super::{earliest_start, load_graph};
use crate::context::ServiceContext;
use crate::error::Result;
use crate::model::{AuditAction, AuditEntry, ChangeSource, DependencyType, EntityKind, ProgramId};
use crate::store::ChangeSet;

/// Outcome of a critical path recalculation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CriticalPathReport {
    /// Tasks whose slack or critical flag changed.
    pub updated_count: usize,
    /// Latest early finish across the program, if it has tasks.
    pub project_end: Option<NaiveDate>,
    /// External ids of zero-slack tasks, in early-start order.
    pub critical_tasks: Vec<String>,
}

/// Early/late window for one node.
#[derive(Debug, Clone, Copy)]
struct Window {
    early_start: NaiveDate,
    early_finish: NaiveDate,
    late_start: NaiveDate,
    late_finish: NaiveDate,
}

/// Recomputes `slack_days` and `is_critical_path` for every non-cancelled
/// task of `program`.
///
/// # Errors
///
/// Returns [`Error::CycleDetected`](crate::error::Error::CycleDetected) or
/// [`Error::DepthExceeded`](crate::error::Error::DepthExceeded) without
/// writing anything, or a storage error.
#[instrument(skip(ctx), fields(program = %program))]
pub fn recalculate_critical_path(
    ctx: &ServiceContext,
    program: &ProgramId,
) -> Result<CriticalPathReport> {
    ctx.locks.with_program(program, || recalculate_locked(ctx, program))
}

pub(crate) fn recalculate_locked(
    ctx: &ServiceContext,
    program: &ProgramId,
) -> Result<CriticalPathReport> {
    let (graph, order) = load_graph(ctx, program)?;
    if graph.is_empty() {
        return Ok(CriticalPathReport::default());
    }

    let mut windows: Vec<Option<Window>> = vec![None; graph.len()];
    for &idx in &order {
        let task = graph.task(idx);
        let duration = task.duration_days();
        let early_start = graph
            .predecessors(idx)
            .filter_map(|edge| {
                let w = windows[edge.from]?;
                Some(earliest_start(
                    edge.kind,
                    edge.lag,
                    w.early_start,
                    w.early_finish,
                    duration,
                    false,
                ))
            })
            .fold(task.current_start, NaiveDate::max);
        let early_finish = early_start + Duration::days(duration);
        windows[idx] = Some(Window {
            early_start,
            early_finish,
            late_start: early_start,
            late_finish: early_finish,
        });
    }

    let project_end = windows.iter().flatten().map(|w| w.early_finish).max();
    let Some(project_end) = project_end else {
        return Ok(CriticalPathReport::default());
    };

    for &idx in order.iter().rev() {
        let duration = graph.task(idx).duration_days();
        let late_finish = graph
            .successors(idx)
            .filter_map(|edge| {
                windows[edge.to].map(|w| latest_finish(edge.kind, edge.lag, w, duration))
            })
            .fold(project_end, NaiveDate::min);
        if let Some(window) = windows[idx].as_mut() {
            window.late_finish = late_finish;
            window.late_start = late_finish - Duration::days(duration);
        }
    }

    let now = ctx.clock.now();
    let mut changes = ChangeSet::default();
    let mut critical: Vec<(NaiveDate, String)> = Vec::new();
    for (idx, window) in windows.iter().enumerate() {
        let Some(window) = window else { continue };
        let task = graph.task(idx);
        let slack = (window.late_start - window.early_start).num_days();
        let is_critical = slack == 0;
        if is_critical {
            critical.push((window.early_start, task.external_id.clone()));
        }
        if task.slack_days == Some(slack) && task.is_critical_path == is_critical {
            continue;
        }
        changes.audit.push(
            AuditEntry::new(
                EntityKind::Task,
                &task.id,
                AuditAction::Updated,
                ChangeSource::Scheduler,
                now,
            )
            .field(
                    "slack_days",
                    task.slack_days.map(|s| s.to_string()),
                    Some(slack.to_string()),
                ),
        );
        let mut updated = task.clone();
        updated.slack_days = Some(slack);
        updated.is_critical_path = is_critical;
        updated.updated_at = now;
        changes.tasks.push(updated);
    }

    let updated_count = changes.tasks.len();
    if !changes.is_empty() {
        ctx.store.apply(changes)?;
    }
    critical.sort();
    let critical_tasks: Vec<String> = critical.into_iter().map(|(_, id)| id).collect();
    info!(
        updated_count,
        critical = critical_tasks.len(),
        %project_end,
        "critical path recalculated"
    );

    Ok(CriticalPathReport { updated_count, project_end: Some(project_end), critical_tasks })
}

/// Latest finish of a predecessor allowed by one outgoing edge.
fn latest_finish(kind: DependencyType, lag: i64, succ: Window, duration: i64) -> NaiveDate {
    match kind {
        DependencyType::FS => succ.late_start - Duration::days(lag),
        DependencyType::SS => succ.late_start - Duration::days(lag - duration),
        DependencyType::FF => succ.late_finish - Duration::days(lag),
        DependencyType::SF => succ.late_finish - Duration::days(lag - duration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::model::{TaskId, WorkStatus};
    use crate::test_support::{at, context_at, date, fs, link, march_task, seed, stored};

    fn ctx() -> ServiceContext {
        context_at(at(3, 1, 8)).0
    }

    fn program() -> ProgramId {
        ProgramId::new(crate::test_support::PROGRAM)
    }

    #[test]
    fn linear_chain_has_zero_slack() {
        let ctx = ctx();
        seed(
            &ctx,
            vec![march_task("A", 2, 4), march_task("B", 4, 7), march_task("C", 7, 11)],
            vec![fs("A", "B"), fs("B", "C")],
        );

        let report = recalculate_critical_path(&ctx, &program()).unwrap();

        assert_eq!(report.updated_count, 3);
        assert_eq!(report.project_end, Some(date(3, 11)));
        assert_eq!(report.critical_tasks, vec!["A", "B", "C"]);
        for id in ["A", "B", "C"] {
            let task = stored(&ctx, id);
            assert_eq!(task.slack_days, Some(0), "{id}");
            assert!(task.is_critical_path, "{id}");
        }
    }

    #[test]
    fn diamond_takes_the_longer_branch() {
        let ctx = ctx();
        seed(
            &ctx,
            vec![
                march_task("A", 2, 4),
                march_task("B", 4, 10),
                march_task("C", 4, 6),
                march_task("D", 4, 6),
            ],
            vec![fs("A", "B"), fs("A", "C"), fs("B", "D"), fs("C", "D")],
        );

        recalculate_critical_path(&ctx, &program()).unwrap();

        assert_eq!(stored(&ctx, "C").slack_days, Some(4));
        assert!(!stored(&ctx, "C").is_critical_path);
        for id in ["A", "B", "D"] {
            assert_eq!(stored(&ctx, id).slack_days, Some(0), "{id}");
        }
        // D starts at B's early finish (Mar 10), so the program ends Mar 12.
        let report = recalculate_critical_path(&ctx, &program()).unwrap();
        assert_eq!(report.project_end, Some(date(3, 12)));
        assert_eq!(report.updated_count, 0);
    }

    #[test]
    fn cycle_leaves_previous_values_untouched() {
        let ctx = ctx();
        let mut a = march_task("A", 2, 4);
        a.slack_days = Some(3);
        let mut b = march_task("B", 4, 6);
        b.is_critical_path = true;
        b.slack_days = Some(0);
        seed(
            &ctx,
            vec![a, b, march_task("C", 6, 8)],
            vec![fs("A", "B"), fs("B", "C"), fs("C", "A")],
        );
        let audit_before = ctx.store.audit_log().unwrap().len();

        let err = recalculate_critical_path(&ctx, &program()).unwrap_err();

        match err {
            Error::CycleDetected { cycle } => assert_eq!(cycle, vec!["A", "B", "C", "A"]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(stored(&ctx, "A").slack_days, Some(3));
        assert!(stored(&ctx, "B").is_critical_path);
        assert_eq!(stored(&ctx, "C").slack_days, None);
        assert_eq!(ctx.store.audit_log().unwrap().len(), audit_before);
    }

    #[test]
    fn cancelled_tasks_break_cycles_and_are_skipped() {
        let ctx = ctx();
        let mut c = march_task("C", 6, 8);
        c.status = WorkStatus::Cancelled;
        seed(&ctx, vec![march_task("A", 2, 4), march_task("B", 4, 6), c], vec![
            fs("A", "B"),
            fs("B", "C"),
            fs("C", "A"),
        ]);

        let report = recalculate_critical_path(&ctx, &program()).unwrap();

        assert_eq!(report.updated_count, 2);
        assert_eq!(stored(&ctx, "C").slack_days, None);
    }

    #[test]
    fn start_to_start_lag_feeds_the_forward_pass() {
        let ctx = ctx();
        seed(
            &ctx,
            vec![march_task("A", 2, 12), march_task("B", 2, 5)],
            vec![link("A", "B", DependencyType::SS, 3)],
        );

        recalculate_critical_path(&ctx, &program()).unwrap();

        // B is pushed to start Mar 5, finishes Mar 8; A ends Mar 12.
        assert_eq!(stored(&ctx, "A").slack_days, Some(0));
        assert_eq!(stored(&ctx, "B").slack_days, Some(4));
    }

    #[test]
    fn lead_lets_a_successor_overlap_its_predecessor() {
        let ctx = ctx();
        seed(
            &ctx,
            vec![march_task("A", 2, 6), march_task("B", 3, 4)],
            vec![link("A", "B", DependencyType::FS, -2)],
        );

        let report = recalculate_critical_path(&ctx, &program()).unwrap();

        // B may start two days before A finishes: Mar 4 to Mar 5. Every task
        // is measured against the program finish, Mar 6, so B keeps a day.
        assert_eq!(report.project_end, Some(date(3, 6)));
        assert_eq!(report.critical_tasks, vec!["A"]);
        assert_eq!(stored(&ctx, "A").slack_days, Some(0));
        assert_eq!(stored(&ctx, "B").slack_days, Some(1));
    }

    #[test]
    fn depth_cap_is_a_structural_error() {
        let ctx = ctx();
        let mut settings = ctx.settings.clone();
        settings.max_dependency_depth = 1;
        let ctx = ctx.with_settings(settings);
        seed(
            &ctx,
            vec![march_task("A", 2, 3), march_task("B", 3, 4), march_task("C", 4, 5)],
            vec![fs("A", "B"), fs("B", "C")],
        );

        let err = recalculate_critical_path(&ctx, &program()).unwrap_err();
        assert!(matches!(err, Error::DepthExceeded { cap: 1, .. }));
        assert_eq!(ctx.store.task(&TaskId::new("A")).unwrap().unwrap().slack_days, None);
    }

    #[test]
    fn unknown_program_is_not_found() {
        let ctx = ctx();
        let err = recalculate_critical_path(&ctx, &ProgramId::new("nope")).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "program", .. }));
    }
}
