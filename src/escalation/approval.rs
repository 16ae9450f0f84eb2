//! PM approval of reported slips.

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::model::{
    AlertStatus, AlertType, ApprovalStatus, AuditAction, AuditEntry, ChangeSource, DelayReason,
    EntityKind, ResponseId, StatusResponse,
};
use crate::schedule::propagate::{propagate_locked, PropagationReport};
use crate::store::ChangeSet;

/// Actor recorded on slips applied without review.
pub const AUTO_APPROVER: &str = "system:auto_approve";

/// A PM's decision on a pending slip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Apply the proposed end date.
    Approve,
    /// Keep the plan as it is.
    Reject,
}

/// Result of an approval decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalOutcome {
    /// The response after the decision.
    pub response: StatusResponse,
    /// Propagation triggered by an approval, when it could run.
    pub propagation: Option<PropagationReport>,
}

/// Approves or rejects the slip proposed by a pending response.
///
/// Approval moves the task's forecast end to the proposed date, records the
/// change with source `status_response`, and propagates the shift to
/// successors. Rejection leaves the task untouched and keeps the reason.
///
/// # Errors
///
/// Returns [`Error::NotFound`] for an unknown response or task,
/// [`Error::Approval`] when the response is not awaiting approval or has
/// been superseded, or a storage error.
#[instrument(skip(ctx, reason), fields(response = %response_id))]
pub fn process_approval(
    ctx: &ServiceContext,
    response_id: &ResponseId,
    decision: Decision,
    actor: &str,
    reason: Option<&str>,
) -> Result<ApprovalOutcome> {
    let response = ctx
        .store
        .response(response_id)?
        .ok_or_else(|| Error::not_found("response", response_id))?;
    let task = ctx
        .store
        .task(&response.task_id)?
        .ok_or_else(|| Error::not_found("task", &response.task_id))?;

    ctx.locks.with_program(&task.program_id, || {
        let mut response = ctx
            .store
            .response(response_id)?
            .ok_or_else(|| Error::not_found("response", response_id))?;
        if response.approval != Some(ApprovalStatus::Pending) {
            return Err(refused(&response, "response is not awaiting approval"));
        }
        if !response.is_latest {
            return Err(refused(&response, "response has been superseded"));
        }

        let propagation = match decision {
            Decision::Approve => {
                apply_delay_locked(ctx, &mut response, actor, ApprovalStatus::Approved, reason)?
            }
            Decision::Reject => {
                reject(ctx, &mut response, actor, reason)?;
                None
            }
        };
        close_approval_requests(ctx, &response)?;
        info!(decision = ?decision, actor, "approval processed");
        Ok(ApprovalOutcome { response, propagation })
    })
}

fn refused(response: &StatusResponse, reason: &str) -> Error {
    Error::Approval { response: response.id.to_string(), reason: reason.to_string() }
}

/// Moves the task's forecast end to the response's proposed date and
/// propagates. Must be called under the program lock.
pub(crate) fn apply_delay_locked(
    ctx: &ServiceContext,
    response: &mut StatusResponse,
    actor: &str,
    approval: ApprovalStatus,
    note: Option<&str>,
) -> Result<Option<PropagationReport>> {
    let now = ctx.clock.now();
    let Some(new_end) = response.proposed_new_date else {
        return Err(refused(response, "response proposes no new date"));
    };
    let mut task = ctx
        .store
        .task(&response.task_id)?
        .ok_or_else(|| Error::not_found("task", &response.task_id))?;
    if new_end < task.current_start {
        return Err(refused(response, "proposed end precedes the task's start"));
    }

    let category = response.reason.as_ref().map(DelayReason::category);
    let why: Vec<&str> =
        [category, response.comment.as_deref(), note].into_iter().flatten().collect();
    let mut entry = AuditEntry::new(
        EntityKind::Task,
        &task.id,
        AuditAction::DelayApproved,
        ChangeSource::StatusResponse,
        now,
    )
    .changed("current_end", task.current_end, new_end)
    .by(actor);
    if !why.is_empty() {
        entry = entry.because(why.join("; "));
    }
    task.current_end = new_end;
    task.updated_at = now;

    response.approval = Some(approval);
    response.approved_by = Some(actor.to_string());
    response.approved_at = Some(now);
    response.processed = true;
    response.processed_at = Some(now);

    let program = task.program_id.clone();
    ctx.store.apply(ChangeSet { tasks: vec![task], audit: vec![entry], ..ChangeSet::default() })?;
    ctx.store.update_response(response)?;

    match propagate_locked(ctx, &program) {
        Ok(report) => Ok(Some(report)),
        Err(err @ (Error::CycleDetected { .. } | Error::DepthExceeded { .. })) => {
            warn!(error = %err, "approved slip applied but not propagated");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn reject(
    ctx: &ServiceContext,
    response: &mut StatusResponse,
    actor: &str,
    reason: Option<&str>,
) -> Result<()> {
    let now = ctx.clock.now();
    response.approval = Some(ApprovalStatus::Rejected);
    response.approved_by = Some(actor.to_string());
    response.approved_at = Some(now);
    response.rejection_reason = reason.map(str::to_string);
    response.processed = true;
    response.processed_at = Some(now);
    ctx.store.update_response(response)?;

    let mut entry = AuditEntry::new(
        EntityKind::Response,
        &response.id,
        AuditAction::DelayRejected,
        ChangeSource::StatusResponse,
        now,
    )
    .field("approval", Some("PENDING".into()), Some("REJECTED".into()))
    .by(actor);
    if let Some(reason) = reason {
        entry = entry.because(reason);
    }
    ctx.store.record_audit(vec![entry])
}

/// Closes open approval requests raised for this response.
fn close_approval_requests(ctx: &ServiceContext, response: &StatusResponse) -> Result<()> {
    let now = ctx.clock.now();
    for mut alert in ctx.store.alerts_for_task(&response.task_id)? {
        if alert.alert_type == AlertType::ApprovalRequest
            && alert.related_response_id.as_ref() == Some(&response.id)
            && !alert.status.is_terminal()
        {
            alert.transition(AlertStatus::Responded, now)?;
            ctx.store.update_alert(&alert)?;
        }
    }
    Ok(())
}
