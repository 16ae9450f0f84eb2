//! Daily scan for upcoming deadlines.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::chain::{find_available, pm_target, resolve_escalation_chain};
use super::{locale, raise_alert, NewAlert, NO_AVAILABLE_RECIPIENT, PRIMARY_UNAVAILABLE};
use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::model::{
    AlertId, AlertStatus, AlertType, EscalationPolicy, ProgramId, Task, Urgency,
    MAX_ESCALATION_LEVEL,
};
use crate::store::AlertInsert;

/// Result of one scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    /// First deadline covered.
    pub window_start: Option<NaiveDate>,
    /// Last deadline covered.
    pub window_end: Option<NaiveDate>,
    /// Open tasks due inside the window.
    pub tasks_checked: usize,
    /// Alerts raised by this scan.
    pub alerts_created: usize,
    /// Tasks that already had an alert for their deadline.
    pub already_alerted: usize,
    /// Tasks skipped because nobody owns them.
    pub unassigned: Vec<String>,
    /// Tasks whose whole chain was unavailable.
    pub manual_intervention: Vec<String>,
    /// Ids of the alerts raised.
    pub alerts: Vec<AlertId>,
}

/// Raises a status check for every open task due in the look-ahead window
/// that has not been alerted for its current deadline.
///
/// Safe to run repeatedly: an alert is keyed by (task, deadline, type), and
/// a task whose check for this deadline was answered or escalated is left
/// alone.
///
/// # Errors
///
/// Returns a storage error; chain problems on individual tasks are recorded
/// in the summary instead.
#[instrument(skip_all)]
pub fn run_daily_scan(ctx: &ServiceContext) -> Result<ScanSummary> {
    let today = ctx.today();
    let from = today + Duration::days(1);
    let to = today + Duration::days(ctx.settings.lookahead_days);
    let mut summary =
        ScanSummary { window_start: Some(from), window_end: Some(to), ..ScanSummary::default() };

    let mut by_program: BTreeMap<ProgramId, Vec<Task>> = BTreeMap::new();
    for task in ctx.store.tasks_due_between(from, to)? {
        by_program.entry(task.program_id.clone()).or_default().push(task);
    }

    for (program, mut tasks) in by_program {
        tasks.sort_by(|a, b| (a.current_end, &a.external_id).cmp(&(b.current_end, &b.external_id)));
        let policy = ctx.store.escalation_policy(Some(&program))?;
        ctx.locks.with_program(&program, || {
            for task in &tasks {
                scan_task(ctx, &policy, &mut summary, task)?;
            }
            Ok(())
        })?;
    }

    info!(
        checked = summary.tasks_checked,
        created = summary.alerts_created,
        existing = summary.already_alerted,
        unassigned = summary.unassigned.len(),
        "daily scan finished"
    );
    Ok(summary)
}

fn scan_task(
    ctx: &ServiceContext,
    policy: &EscalationPolicy,
    summary: &mut ScanSummary,
    task: &Task,
) -> Result<()> {
    summary.tasks_checked += 1;
    let deadline = task.current_end;
    if already_alerted(ctx, task, deadline)? {
        summary.already_alerted += 1;
        return Ok(());
    }

    let Some(owner) = &task.resource_id else {
        warn!(task = %task.external_id, "task has no assigned resource, skipped");
        summary.unassigned.push(task.external_id.clone());
        return Ok(());
    };
    let chain = match resolve_escalation_chain(ctx, owner, Some(&task.program_id)) {
        Ok(chain) => chain,
        Err(Error::NotFound { .. }) => {
            warn!(
                task = %task.external_id,
                resource = %owner,
                "assigned resource not found, skipped"
            );
            summary.unassigned.push(task.external_id.clone());
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    let found = find_available(&chain, 0);
    let new = match found.recipient {
        Some(entry) => {
            let (tz, country) = locale(ctx, Some(&entry.resource));
            let days_before = policy.days_before_deadline;
            let send_at = ctx
                .calendar
                .send_time_before(deadline, days_before, policy.alert_time, tz, country)
                .unwrap_or_else(|| ctx.clock.now());
            let reason = found
                .skipped
                .first()
                .filter(|_| entry.level > 0)
                .map(|skip| format!("{PRIMARY_UNAVAILABLE}: {skip}"));
            NewAlert {
                recipient: Some(entry.resource.id),
                level: entry.level,
                send_at,
                reason,
                skipped: found.skipped,
                ..NewAlert::now(ctx, AlertType::StatusCheck, deadline)
            }
        }
        None => NewAlert {
            recipient: pm_target(ctx, &task.program_id)?.map(|e| e.resource.id),
            level: MAX_ESCALATION_LEVEL,
            urgency: Urgency::Critical,
            reason: Some(NO_AVAILABLE_RECIPIENT.to_string()),
            skipped: found.skipped,
            manual: true,
            ..NewAlert::now(ctx, AlertType::Escalation, deadline)
        },
    };

    match raise_alert(ctx, task, new)? {
        AlertInsert::Inserted(alert) => {
            if alert.requires_manual_intervention {
                warn!(
                    task = %task.external_id,
                    alert = %alert.id,
                    "no available recipient in escalation chain"
                );
                summary.manual_intervention.push(task.external_id.clone());
            } else {
                info!(
                    task = %task.external_id,
                    alert = %alert.id,
                    level = alert.escalation_level,
                    send_at = %alert.scheduled_send_at,
                    "status check scheduled"
                );
            }
            summary.alerts_created += 1;
            summary.alerts.push(alert.id);
        }
        AlertInsert::Existing(_) => summary.already_alerted += 1,
    }
    Ok(())
}

/// Whether a status check for this deadline exists that was not withdrawn.
fn already_alerted(ctx: &ServiceContext, task: &Task, deadline: NaiveDate) -> Result<bool> {
    Ok(ctx.store.alerts_for_task(&task.id)?.iter().any(|a| {
        a.deadline == deadline
            && matches!(a.alert_type, AlertType::StatusCheck | AlertType::Escalation)
            && a.status != AlertStatus::Cancelled
    }))
}
