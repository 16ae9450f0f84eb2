//! Critical path scheduling and date propagation over a program's
//! dependency graph.
//!
//! Both operations read one consistent snapshot of tasks and dependencies,
//! compute everything in memory, then apply their writes in a single change
//! set. A cycle or an over-long chain aborts before anything is written.

pub mod critical_path;
pub mod dag;
pub mod propagate;

pub use critical_path::{recalculate_critical_path, CriticalPathReport};
pub use dag::WorkGraph;
pub use propagate::{propagate_dependency_dates, PropagationReport};

use chrono::{Duration, NaiveDate};

use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::model::{DependencyType, ProgramId, WorkStatus};

/// Loads the non-cancelled tasks of `program` and their dependencies, and
/// checks the graph is acyclic and within the depth cap.
///
/// Returns the graph together with its topological order.
pub(crate) fn load_graph(
    ctx: &ServiceContext,
    program: &ProgramId,
) -> Result<(WorkGraph, Vec<usize>)> {
    if ctx.store.program(program)?.is_none() {
        return Err(Error::not_found("program", program));
    }
    let tasks: Vec<_> = ctx
        .store
        .tasks_for_program(program)?
        .into_iter()
        .filter(|t| t.status != WorkStatus::Cancelled)
        .collect();
    let dependencies = ctx.store.dependencies_for_program(program)?;
    let graph = WorkGraph::build(tasks, &dependencies);
    let order = graph.toposort()?;
    graph.check_depth(&order, ctx.settings.max_dependency_depth)?;
    Ok((graph, order))
}

/// Earliest successor start allowed by one edge, given the predecessor's
/// window and the successor's duration.
///
/// `inclusive_finish` adds the day after the predecessor's end for
/// finish-to-start edges; the critical path passes use exclusive finishes
/// instead.
pub(crate) fn earliest_start(
    kind: DependencyType,
    lag: i64,
    pred_start: NaiveDate,
    pred_end: NaiveDate,
    duration: i64,
    inclusive_finish: bool,
) -> NaiveDate {
    let finish_gap = if inclusive_finish { 1 } else { 0 };
    match kind {
        DependencyType::FS => pred_end + Duration::days(lag + finish_gap),
        DependencyType::SS => pred_start + Duration::days(lag),
        DependencyType::FF => pred_end + Duration::days(lag - duration),
        DependencyType::SF => pred_start + Duration::days(lag - duration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    #[test]
    fn finish_to_start_respects_inclusive_flag() {
        assert_eq!(earliest_start(DependencyType::FS, 0, d(2), d(6), 3, false), d(6));
        assert_eq!(earliest_start(DependencyType::FS, 0, d(2), d(6), 3, true), d(7));
        assert_eq!(earliest_start(DependencyType::FS, -2, d(2), d(6), 3, true), d(5));
    }

    #[test]
    fn other_kinds_align_the_right_ends() {
        assert_eq!(earliest_start(DependencyType::SS, 1, d(2), d(6), 3, true), d(3));
        assert_eq!(earliest_start(DependencyType::FF, 0, d(2), d(10), 3, true), d(7));
        assert_eq!(earliest_start(DependencyType::SF, 0, d(10), d(12), 3, true), d(7));
    }
}
