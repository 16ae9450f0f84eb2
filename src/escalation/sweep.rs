//! Periodic sweep: lazy cancellation, stale expiry and timeout escalation.

use serde::Serialize;
use tracing::{info, instrument, warn};

use super::chain::{find_available, resolve_escalation_chain};
use super::{
    raise_alert, NewAlert, DEADLINE_PASSED, NO_AVAILABLE_RECIPIENT, TIMEOUT_NO_RESPONSE,
};
use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::model::{
    Alert, AlertId, AlertStatus, AlertType, AuditAction, AuditEntry, ChangeSource, EntityKind,
    ProgramId, ResourceId, Task, MAX_ESCALATION_LEVEL,
};

/// One alert moved up the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscalationStep {
    /// The expired alert.
    pub from_alert: AlertId,
    /// The alert that replaced it.
    pub to_alert: AlertId,
    /// Level of the expired alert.
    pub from_level: u8,
    /// Level of the new alert.
    pub to_level: u8,
    /// Who receives the new alert.
    pub recipient: ResourceId,
}

/// Result of one sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    /// Alerts withdrawn because their task closed.
    pub cancelled: Vec<AlertId>,
    /// Alerts closed because their deadline day has passed.
    pub stale: Vec<AlertId>,
    /// Timed-out alerts that were escalated.
    pub escalated: Vec<EscalationStep>,
    /// Timed-out alerts with nobody left to escalate to.
    pub manual_intervention: Vec<AlertId>,
}

impl SweepSummary {
    /// Whether the sweep changed anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cancelled.is_empty()
            && self.stale.is_empty()
            && self.escalated.is_empty()
            && self.manual_intervention.is_empty()
    }
}

const OPEN: [AlertStatus; 4] =
    [AlertStatus::Pending, AlertStatus::Sent, AlertStatus::Delivered, AlertStatus::Opened];

/// Closes alerts that can no longer be answered, then escalates unanswered
/// alerts whose timeout has passed.
///
/// Alerts on completed or cancelled tasks are cancelled. Alerts whose deadline
/// day is over are closed as stale: unanswered ones become Expired, unsent ones
/// Cancelled. This also retires level 3 alerts, which have no timeout.
///
/// An escalated alert becomes Expired and a new Escalation alert, linked by
/// `parent_alert_id`, goes to the next available entry above it. When the
/// chain is exhausted the alert is flagged for manual intervention and its
/// timeout cleared, so it is not picked up again.
///
/// Each alert is re-read under its program lock, so one answered or closed
/// after the sweep listed it is left alone.
///
/// # Errors
///
/// Returns a storage error.
#[instrument(skip_all)]
pub fn sweep(ctx: &ServiceContext) -> Result<SweepSummary> {
    let mut summary = SweepSummary::default();

    let mut open: Vec<(AlertId, ProgramId)> = ctx
        .store
        .alerts_with_status(&OPEN)?
        .into_iter()
        .map(|a| (a.id, a.program_id))
        .collect();
    open.sort();

    for (id, program) in open {
        ctx.locks.with_program(&program, || sweep_alert(ctx, &mut summary, &id))?;
    }

    info!(
        cancelled = summary.cancelled.len(),
        stale = summary.stale.len(),
        escalated = summary.escalated.len(),
        manual = summary.manual_intervention.len(),
        "sweep finished"
    );
    Ok(summary)
}

/// Handles one alert. Callers hold its program lock.
fn sweep_alert(ctx: &ServiceContext, summary: &mut SweepSummary, id: &AlertId) -> Result<()> {
    let now = ctx.clock.now();
    let Some(mut alert) = ctx.store.alert(id)?.filter(|a| OPEN.contains(&a.status)) else {
        return Ok(());
    };

    let task = ctx.store.task(&alert.task_id)?;
    let Some(task) = task.filter(Task::is_open) else {
        alert.transition(AlertStatus::Cancelled, now)?;
        ctx.store.update_alert(&alert)?;
        summary.cancelled.push(alert.id);
        return Ok(());
    };

    if alert.deadline < ctx.today() {
        return expire_stale(ctx, summary, alert);
    }

    let timed_out = alert.status.is_awaiting_response()
        && alert.escalation_timeout_at.is_some_and(|t| t <= now)
        && matches!(alert.alert_type, AlertType::StatusCheck | AlertType::Escalation);
    if timed_out {
        escalate(ctx, summary, alert, &task)?;
    }
    Ok(())
}

fn expire_stale(ctx: &ServiceContext, summary: &mut SweepSummary, mut alert: Alert) -> Result<()> {
    let now = ctx.clock.now();
    let from = alert.status;
    let next = if alert.status.is_awaiting_response() {
        AlertStatus::Expired
    } else {
        AlertStatus::Cancelled
    };
    alert.transition(next, now)?;
    ctx.store.update_alert(&alert)?;
    ctx.store.record_audit(vec![AuditEntry::new(
        EntityKind::Alert,
        &alert.id,
        AuditAction::Updated,
        ChangeSource::Escalation,
        now,
    )
    .changed("status", format!("{from:?}"), format!("{next:?}"))
    .because(DEADLINE_PASSED)])?;
    info!(alert = %alert.id, deadline = %alert.deadline, "stale alert closed");
    summary.stale.push(alert.id);
    Ok(())
}

fn escalate(
    ctx: &ServiceContext,
    summary: &mut SweepSummary,
    mut alert: Alert,
    task: &Task,
) -> Result<()> {
    let now = ctx.clock.now();
    if alert.escalation_level >= MAX_ESCALATION_LEVEL {
        return Ok(());
    }
    let next_level = alert.escalation_level + 1;

    let resolution = match &task.resource_id {
        Some(owner) => match resolve_escalation_chain(ctx, owner, Some(&task.program_id)) {
            Ok(chain) => find_available(&chain, next_level),
            Err(Error::NotFound { .. }) => Default::default(),
            Err(err) => return Err(err),
        },
        None => Default::default(),
    };

    let Some(target) = resolution.recipient else {
        warn!(alert = %alert.id, level = alert.escalation_level, "escalation chain exhausted");
        alert.requires_manual_intervention = true;
        alert.escalation_timeout_at = None;
        alert.escalation_reason = Some(NO_AVAILABLE_RECIPIENT.to_string());
        alert.skipped_recipients.extend(resolution.skipped);
        ctx.store.update_alert(&alert)?;
        ctx.store.record_audit(vec![AuditEntry::new(
            EntityKind::Alert,
            &alert.id,
            AuditAction::Flagged,
            ChangeSource::Escalation,
            now,
        )
        .changed("requires_manual_intervention", false, true)
        .because(NO_AVAILABLE_RECIPIENT)])?;
        summary.manual_intervention.push(alert.id);
        return Ok(());
    };

    alert.transition(AlertStatus::Expired, now)?;
    ctx.store.update_alert(&alert)?;

    let new = NewAlert {
        recipient: Some(target.resource.id.clone()),
        level: target.level,
        reason: Some(TIMEOUT_NO_RESPONSE.to_string()),
        skipped: resolution.skipped,
        parent: Some(alert.id.clone()),
        ..NewAlert::now(ctx, AlertType::Escalation, alert.deadline)
    };
    let escalated = raise_alert(ctx, task, new)?.alert().clone();

    ctx.store.record_audit(vec![AuditEntry::new(
        EntityKind::Alert,
        &alert.id,
        AuditAction::Escalated,
        ChangeSource::Escalation,
        now,
    )
    .changed("escalation_level", alert.escalation_level, escalated.escalation_level)
    .because(TIMEOUT_NO_RESPONSE)])?;

    info!(
        from = %alert.id,
        to = %escalated.id,
        level = escalated.escalation_level,
        recipient = %target.resource.external_id,
        "alert escalated"
    );
    summary.escalated.push(EscalationStep {
        from_alert: alert.id,
        to_alert: escalated.id,
        from_level: alert.escalation_level,
        to_level: escalated.escalation_level,
        recipient: target.resource.id,
    });
    Ok(())
}
