//! Read-only "what if this slips" analysis.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::model::{DelayReason, DurationRecalculation, ResourceId, Task, TaskId};
use crate::schedule::dag::WorkGraph;

/// Allocation assumed for every open task of a resource.
const TASK_ALLOCATION_PERCENT: u32 = 100;

/// Overall risk of a proposed slip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    /// Score below 2.
    Low,
    /// Score 2 or 3.
    Medium,
    /// Score 4 or 5.
    High,
    /// Score 6 and up.
    Critical,
}

impl RiskLevel {
    fn from_score(score: u32) -> Self {
        match score {
            6.. => Self::Critical,
            4..=5 => Self::High,
            2..=3 => Self::Medium,
            _ => Self::Low,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        })
    }
}

/// A downstream task that would move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AffectedTask {
    /// Task id.
    pub task_id: TaskId,
    /// Import key.
    pub external_id: String,
    /// Display name.
    pub name: String,
    /// Distance from the delayed task; direct successors are 1.
    pub depth: usize,
    /// Forecast start today.
    pub current_start: NaiveDate,
    /// Forecast end today.
    pub current_end: NaiveDate,
    /// Start after the slip.
    pub new_start: NaiveDate,
    /// End after the slip.
    pub new_end: NaiveDate,
}

/// Over-allocation the slip would cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceConflict {
    /// The over-allocated resource.
    pub resource_id: ResourceId,
    /// Display name.
    pub resource_name: String,
    /// Summed allocation over the extended window.
    pub total_allocation: u32,
    /// The resource's ceiling.
    pub max_utilization: u32,
    /// External ids of the overlapping tasks.
    pub overlapping: Vec<String>,
}

/// Everything a PM needs to judge a proposed slip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImpactAnalysis {
    /// The delayed task.
    pub task_id: TaskId,
    /// Its import key.
    pub external_id: String,
    /// Forecast end today.
    pub original_end: NaiveDate,
    /// Proposed end.
    pub proposed_end: NaiveDate,
    /// `proposed_end - original_end`; negative for pull-ins.
    pub delay_days: i64,
    /// Critical flag from the last critical path run.
    pub is_critical_path: bool,
    /// Set for critical tasks.
    pub critical_path_impact: Option<String>,
    /// Downstream tasks in breadth-first order.
    pub affected: Vec<AffectedTask>,
    /// `affected.len()`.
    pub cascade_count: usize,
    /// Conflicts for the task's resource.
    pub resource_conflicts: Vec<ResourceConflict>,
    /// Combined risk.
    pub risk_level: RiskLevel,
    /// Suggested next steps.
    pub recommendation: String,
    /// Dates derived from the delay reason, when one was given.
    pub recalculation: Option<DurationRecalculation>,
}

/// Previews what moving a task's end to `proposed_end` would do, without
/// writing anything.
///
/// Successors are shifted naively by the delay, walking breadth-first up to
/// the configured depth and skipping completed or cancelled tasks.
///
/// # Errors
///
/// Returns [`Error::NotFound`] for an unknown task or a storage error.
#[instrument(skip(ctx, reason), fields(task = %task_id))]
pub fn preview_impact(
    ctx: &ServiceContext,
    task_id: &TaskId,
    proposed_end: NaiveDate,
    reason: Option<&DelayReason>,
) -> Result<ImpactAnalysis> {
    let task = ctx.store.task(task_id)?.ok_or_else(|| Error::not_found("task", task_id))?;
    let delay_days = (proposed_end - task.current_end).num_days();

    let tasks = ctx.store.tasks_for_program(&task.program_id)?;
    let dependencies = ctx.store.dependencies_for_program(&task.program_id)?;
    let graph = WorkGraph::build(tasks, &dependencies);
    let affected = cascade(&graph, &task, delay_days, ctx.settings.impact_max_depth);
    let resource_conflicts = resource_conflicts(ctx, &task, proposed_end)?;

    let is_critical_path = task.is_critical_path;
    let risk_level = risk_level(
        delay_days,
        is_critical_path,
        affected.len(),
        !resource_conflicts.is_empty(),
    );
    let recommendation =
        recommendation(delay_days, reason, is_critical_path, affected.len(), risk_level);
    let critical_path_impact = is_critical_path.then(|| {
        format!(
            "This task is on the critical path. A {delay_days}-day delay will directly impact the \
             project end date."
        )
    });
    let recalculation =
        reason.map(|r| r.recalculate(task.current_start, task.current_end, proposed_end));

    debug!(delay_days, cascade = affected.len(), risk = %risk_level, "impact previewed");
    Ok(ImpactAnalysis {
        task_id: task.id,
        external_id: task.external_id,
        original_end: task.current_end,
        proposed_end,
        delay_days,
        is_critical_path,
        critical_path_impact,
        cascade_count: affected.len(),
        affected,
        resource_conflicts,
        risk_level,
        recommendation,
        recalculation,
    })
}

fn cascade(graph: &WorkGraph, task: &Task, delay_days: i64, max_depth: usize) -> Vec<AffectedTask> {
    let Some(root) = graph.index_of(&task.id) else {
        return Vec::new();
    };
    let shift = Duration::days(delay_days);
    let mut seen = HashSet::from([root]);
    let mut queue = VecDeque::from([(root, 0)]);
    let mut affected = Vec::new();

    while let Some((idx, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for edge in graph.successors(idx) {
            let next = graph.task(edge.to);
            if !next.is_open() || !seen.insert(edge.to) {
                continue;
            }
            affected.push(AffectedTask {
                task_id: next.id.clone(),
                external_id: next.external_id.clone(),
                name: next.name.clone(),
                depth: depth + 1,
                current_start: next.current_start,
                current_end: next.current_end,
                new_start: next.current_start + shift,
                new_end: next.current_end + shift,
            });
            queue.push_back((edge.to, depth + 1));
        }
    }
    affected
}

fn resource_conflicts(
    ctx: &ServiceContext,
    task: &Task,
    proposed_end: NaiveDate,
) -> Result<Vec<ResourceConflict>> {
    let resource = match &task.resource_id {
        Some(id) => ctx.store.resource(id)?,
        None => None,
    };
    let Some(resource) = resource else {
        return Ok(Vec::new());
    };
    let mut overlapping: Vec<String> = ctx
        .store
        .tasks_for_program(&task.program_id)?
        .into_iter()
        .filter(|other| {
            other.id != task.id
                && other.is_open()
                && other.resource_id.as_ref() == Some(&resource.id)
                && other.current_start <= proposed_end
                && other.current_end >= task.current_start
        })
        .map(|other| other.external_id)
        .collect();
    overlapping.sort();

    let tasks = u32::try_from(overlapping.len() + 1).unwrap_or(u32::MAX);
    let total_allocation = tasks.saturating_mul(TASK_ALLOCATION_PERCENT);
    let max_utilization = u32::from(resource.max_utilization);
    if total_allocation <= max_utilization {
        return Ok(Vec::new());
    }
    Ok(vec![ResourceConflict {
        resource_id: resource.id,
        resource_name: resource.name,
        total_allocation,
        max_utilization,
        overlapping,
    }])
}

fn risk_level(delay_days: i64, critical: bool, cascade: usize, conflicts: bool) -> RiskLevel {
    let mut score = match delay_days {
        7.. => 3,
        3..=6 => 2,
        1..=2 => 1,
        _ => 0,
    };
    if critical {
        score += 3;
    }
    score += match cascade {
        5.. => 2,
        2..=4 => 1,
        _ => 0,
    };
    if conflicts {
        score += 1;
    }
    RiskLevel::from_score(score)
}

fn recommendation(
    delay_days: i64,
    reason: Option<&DelayReason>,
    critical: bool,
    cascade: usize,
    risk: RiskLevel,
) -> String {
    let mut parts = Vec::new();
    if risk == RiskLevel::Critical {
        parts.push("CRITICAL: Immediate PM attention required.".to_string());
    }
    if critical {
        parts.push(format!(
            "Consider adding resources to recover {delay_days} days on critical path."
        ));
    }
    if cascade > 3 {
        parts.push(format!("Review {cascade} downstream tasks for potential parallel work."));
    }
    match reason {
        Some(DelayReason::ResourcePulled { .. }) => parts.push(
            "Consider reassigning to dedicated resource to prevent further delays.".to_string(),
        ),
        Some(DelayReason::ScopeIncrease { .. }) => {
            parts.push("Evaluate if new scope can be deferred to future phase.".to_string());
        }
        Some(DelayReason::ExternalDependency { .. }) => parts.push(
            "Set up daily check-in with external party to track progress.".to_string(),
        ),
        _ => {}
    }
    if parts.is_empty() {
        parts.push(format!("Approve {delay_days}-day schedule adjustment."));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CalculationMethod, ProgramId, WorkStatus};
    use crate::schedule::recalculate_critical_path;
    use crate::store::ChangeSet;
    use crate::test_support::{
        at, context_at, date, fs, march_task, owned_by, seed, staffed, stored, PROGRAM,
    };

    #[test]
    fn chain_successors_shift_naively_with_depth() {
        let (ctx, _, _) = context_at(at(3, 2, 9));
        seed(
            &ctx,
            vec![march_task("A", 2, 4), march_task("B", 5, 6), march_task("C", 7, 9)],
            vec![fs("A", "B"), fs("B", "C")],
        );

        let impact = preview_impact(&ctx, &TaskId::new("A"), date(3, 6), None).unwrap();
        assert_eq!(impact.delay_days, 2);
        assert_eq!(impact.cascade_count, 2);
        let b = &impact.affected[0];
        assert_eq!((b.external_id.as_str(), b.depth), ("B", 1));
        assert_eq!((b.new_start, b.new_end), (date(3, 7), date(3, 8)));
        assert_eq!(impact.affected[1].depth, 2);
        assert_eq!(impact.affected[1].new_end, date(3, 11));
        assert_eq!(stored(&ctx, "B").current_start, date(3, 5));
    }

    #[test]
    fn closed_successors_are_skipped_and_depth_is_capped() {
        let (ctx, _, _) = context_at(at(3, 2, 9));
        let mut done = march_task("B", 5, 6);
        done.status = WorkStatus::Completed;
        let ids: Vec<String> = (0..15).map(|i| format!("T{i:02}")).collect();
        let mut tasks: Vec<Task> = ids.iter().map(|id| march_task(id, 10, 11)).collect();
        tasks.extend([march_task("A", 2, 4), done, march_task("C", 7, 8)]);
        let mut deps = vec![fs("A", "B"), fs("B", "C"), fs("A", "T00")];
        deps.extend(ids.windows(2).map(|pair| fs(&pair[0], &pair[1])));
        seed(&ctx, tasks, deps);

        let impact = preview_impact(&ctx, &TaskId::new("A"), date(3, 5), None).unwrap();
        assert!(impact.affected.iter().all(|t| t.external_id != "B" && t.external_id != "C"));
        assert_eq!(impact.cascade_count, ctx.settings.impact_max_depth);
        assert_eq!(impact.affected.last().unwrap().depth, ctx.settings.impact_max_depth);
    }

    #[test]
    fn critical_slip_with_long_cascade_is_critical_risk() {
        let (ctx, _, _) = context_at(at(3, 2, 9));
        let ids = ["A", "B", "C", "D", "E", "F"];
        let tasks = ids.iter().enumerate().map(|(i, id)| {
            let start = 2 + 2 * u32::try_from(i).unwrap();
            march_task(id, start, start + 2)
        });
        let deps = ids.windows(2).map(|pair| fs(pair[0], pair[1])).collect();
        seed(&ctx, tasks.collect(), deps);
        recalculate_critical_path(&ctx, &ProgramId::new(PROGRAM)).unwrap();

        let impact = preview_impact(&ctx, &TaskId::new("A"), date(3, 11), None).unwrap();
        assert!(impact.is_critical_path);
        assert_eq!(impact.cascade_count, 5);
        assert_eq!(impact.risk_level, RiskLevel::Critical);
        assert_eq!(
            impact.critical_path_impact.as_deref(),
            Some(
                "This task is on the critical path. A 7-day delay will directly impact the \
                 project end date."
            )
        );
        assert_eq!(
            impact.recommendation,
            "CRITICAL: Immediate PM attention required. Consider adding resources to recover 7 \
             days on critical path. Review 5 downstream tasks for potential parallel work."
        );
    }

    #[test]
    fn small_isolated_slip_is_low_risk() {
        let (ctx, _, _) = context_at(at(3, 2, 9));
        seed(&ctx, vec![march_task("A", 2, 4)], vec![]);

        let impact = preview_impact(&ctx, &TaskId::new("A"), date(3, 5), None).unwrap();
        assert_eq!(impact.risk_level, RiskLevel::Low);
        assert_eq!(impact.recommendation, "Approve 1-day schedule adjustment.");
        assert!(impact.critical_path_impact.is_none());
        assert!(impact.recalculation.is_none());
    }

    #[test]
    fn reason_drives_recalculation_and_advice() {
        let (ctx, _, _) = context_at(at(3, 2, 9));
        seed(&ctx, vec![march_task("A", 2, 12)], vec![]);
        let reason = DelayReason::ScopeIncrease { additional_work_percent: 50.0 };

        let impact = preview_impact(&ctx, &TaskId::new("A"), date(3, 13), Some(&reason)).unwrap();
        let recalculation = impact.recalculation.unwrap();
        assert_eq!(recalculation.method, CalculationMethod::ScopePercentage);
        assert_eq!(recalculation.new_end, date(3, 17));
        assert_eq!(impact.recommendation, "Evaluate if new scope can be deferred to future phase.");
    }

    #[test]
    fn overlapping_work_for_the_same_owner_is_a_conflict() {
        let (ctx, _, _) = context_at(at(3, 2, 9));
        staffed(
            &ctx,
            vec![
                owned_by(march_task("A", 2, 6), "owner"),
                owned_by(march_task("B", 9, 12), "owner"),
                owned_by(march_task("C", 20, 24), "owner"),
                owned_by(march_task("D", 9, 12), "backup"),
            ],
            vec![],
        );

        let impact = preview_impact(&ctx, &TaskId::new("A"), date(3, 10), None).unwrap();
        assert_eq!(impact.resource_conflicts.len(), 1);
        let conflict = &impact.resource_conflicts[0];
        assert_eq!(conflict.resource_id, ResourceId::new("owner"));
        assert_eq!(conflict.total_allocation, 200);
        assert_eq!(conflict.max_utilization, 100);
        assert_eq!(conflict.overlapping, vec!["B".to_string()]);

        let mut b = stored(&ctx, "B");
        b.status = WorkStatus::Cancelled;
        ctx.store.apply(ChangeSet { tasks: vec![b], ..ChangeSet::default() }).unwrap();
        let impact = preview_impact(&ctx, &TaskId::new("A"), date(3, 10), None).unwrap();
        assert!(impact.resource_conflicts.is_empty());
    }

    #[test]
    fn unknown_task_is_not_found() {
        let (ctx, _, _) = context_at(at(3, 2, 9));
        let err = preview_impact(&ctx, &TaskId::new("nope"), date(3, 5), None).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "task", .. }));
    }
}
