//! Magic-link response ingestion.
//!
//! A token is claimed by compare-and-swap, so of two concurrent submissions
//! exactly one lands and the other gets `ALREADY_USED`. Responses are
//! append-only: each new one becomes the task's latest version and the
//! previous latest records which version replaced it.

use tracing::{info, instrument};

use super::approval::{apply_delay_locked, AUTO_APPROVER};
use super::chain::pm_target;
use super::tokens::{check_token, hash_token};
use super::{raise_alert, NewAlert, BLOCKER_REPORTED};
use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::model::{
    AlertId, AlertStatus, AlertType, ApprovalStatus, AuditAction, AuditEntry, ChangeSource,
    EntityKind, EscalationPolicy, ReportedStatus, ResponseId, ResponseSubmission, ResponseToken,
    StatusResponse, Task, Urgency, WorkStatus, MAX_ESCALATION_LEVEL,
};
use crate::store::{ChangeSet, TokenClaim};

/// Records a status response submitted through a magic link and applies its
/// side effects.
///
/// A repeated `idempotency_key` returns the response already stored under
/// it. A slip of at most the policy's auto-approve threshold is applied and
/// propagated at once; a larger one waits for PM approval.
///
/// # Errors
///
/// Returns [`Error::TokenNotFound`], [`Error::TokenExpired`] or
/// [`Error::TokenAlreadyUsed`] for unusable tokens, [`Error::Validation`]
/// for an incomplete submission (the token stays usable), or a storage
/// error.
#[instrument(skip(ctx, raw_token, submission))]
pub fn submit_response(
    ctx: &ServiceContext,
    raw_token: &str,
    submission: ResponseSubmission,
    idempotency_key: Option<&str>,
) -> Result<StatusResponse> {
    if let Some(existing) = stored_under(ctx, idempotency_key)? {
        return Ok(existing);
    }

    let hash = hash_token(raw_token);
    let bound = ctx.store.token(&hash)?.ok_or(Error::TokenNotFound)?;
    let load = || -> Result<Task> {
        ctx.store.task(&bound.task_id)?.ok_or_else(|| Error::not_found("task", &bound.task_id))
    };
    let program = load()?.program_id;

    ctx.locks.with_program(&program, || {
        // A retry that queued behind the original must see its result.
        if let Some(existing) = stored_under(ctx, idempotency_key)? {
            return Ok(existing);
        }
        check_token(ctx, raw_token)?;
        let task = load()?;
        let status = validate(&submission, &task)?;

        let now = ctx.clock.now();
        let TokenClaim::Claimed(token) = ctx.store.consume_token(&hash, now)? else {
            return Err(Error::TokenAlreadyUsed);
        };
        let policy = ctx.store.escalation_policy(Some(&task.program_id))?;
        let mut response =
            record(ctx, &token, &task, status, submission, idempotency_key, &policy)?;
        close_checks(ctx, &token.alert_id, &task)?;
        update_task(ctx, &response, task.clone())?;

        match response.approval {
            Some(ApprovalStatus::AutoApproved) => {
                let approved = ApprovalStatus::AutoApproved;
                apply_delay_locked(ctx, &mut response, AUTO_APPROVER, approved, None)?;
            }
            Some(ApprovalStatus::Pending) => {
                request_approval(ctx, &task, &response, &token.alert_id)?;
            }
            _ => {}
        }
        if status == ReportedStatus::Blocked && policy.blocker_immediate_escalation {
            report_blocker(ctx, &task, &response, &token.alert_id)?;
        }

        info!(
            task = %task.external_id,
            response = %response.id,
            version = response.response_version,
            status = ?status,
            approval = ?response.approval,
            "status response recorded"
        );
        Ok(response)
    })
}

fn stored_under(ctx: &ServiceContext, key: Option<&str>) -> Result<Option<StatusResponse>> {
    let Some(key) = key else {
        return Ok(None);
    };
    let existing = ctx.store.response_by_idempotency_key(key)?;
    if let Some(response) = &existing {
        info!(response = %response.id, "duplicate submission, returning stored response");
    }
    Ok(existing)
}

fn validate(submission: &ResponseSubmission, task: &Task) -> Result<ReportedStatus> {
    let status = submission
        .reported_status
        .ok_or_else(|| Error::validation(&task.external_id, "reported status is required"))?;
    if status == ReportedStatus::Delayed && submission.proposed_new_date.is_none() {
        return Err(Error::validation(&task.external_id, "a delay needs a proposed new date"));
    }
    if submission.proposed_new_date.is_some_and(|d| d < task.current_start) {
        return Err(Error::validation(
            &task.external_id,
            "proposed new date precedes the task's start",
        ));
    }
    Ok(status)
}

fn record(
    ctx: &ServiceContext,
    token: &ResponseToken,
    task: &Task,
    status: ReportedStatus,
    submission: ResponseSubmission,
    idempotency_key: Option<&str>,
    policy: &EscalationPolicy,
) -> Result<StatusResponse> {
    let now = ctx.clock.now();
    let delay_days = submission
        .proposed_new_date
        .filter(|_| matches!(status, ReportedStatus::Delayed | ReportedStatus::Blocked))
        .map(|date| (date - task.current_end).num_days());
    let approval = delay_days.map(|days| {
        if days <= policy.auto_approve_delay_up_to_days {
            ApprovalStatus::AutoApproved
        } else {
            ApprovalStatus::Pending
        }
    });

    let response = ctx.store.append_response(StatusResponse {
        id: ResponseId::new(ctx.id_gen.generate_id("response")),
        alert_id: token.alert_id.clone(),
        task_id: task.id.clone(),
        responder_id: token.resource_id.clone(),
        response_version: 0,
        is_latest: true,
        superseded_by_version: None,
        reported_status: status,
        proposed_new_date: submission.proposed_new_date,
        delay_days,
        reason: submission.reason,
        comment: submission.comment,
        started_on: submission.started_on,
        approval,
        approved_by: None,
        approved_at: None,
        rejection_reason: None,
        processed: approval.is_none(),
        processed_at: approval.is_none().then_some(now),
        idempotency_key: idempotency_key
            .map_or_else(|| ctx.id_gen.generate_id("submission"), str::to_string),
        submitted_at: now,
    })?;

    ctx.store.record_audit(vec![AuditEntry::new(
        EntityKind::Response,
        &response.id,
        AuditAction::Responded,
        ChangeSource::StatusResponse,
        now,
    )
    .field("reported_status", None, Some(format!("{status:?}")))
    .by(token.resource_id.as_str())])?;
    Ok(response)
}

/// Marks the answered alert, and any other open check for the same
/// deadline, as Responded.
fn close_checks(ctx: &ServiceContext, answered: &AlertId, task: &Task) -> Result<()> {
    let now = ctx.clock.now();
    let alerts = ctx.store.alerts_for_task(&task.id)?;
    let deadline = alerts.iter().find(|a| &a.id == answered).map(|a| a.deadline);
    for mut alert in alerts {
        let same_check = &alert.id == answered
            || (Some(alert.deadline) == deadline
                && matches!(alert.alert_type, AlertType::StatusCheck | AlertType::Escalation));
        if same_check && alert.status.can_transition_to(AlertStatus::Responded) {
            alert.transition(AlertStatus::Responded, now)?;
            ctx.store.update_alert(&alert)?;
        }
    }
    Ok(())
}

/// Writes what the responder reported about reality onto the task.
fn update_task(ctx: &ServiceContext, response: &StatusResponse, mut task: Task) -> Result<()> {
    let now = ctx.clock.now();
    let actor = response.responder_id.as_str();
    let id = task.id.clone();
    let entry = |action, field: &str, old: String, new: String| {
        AuditEntry::new(EntityKind::Task, &id, action, ChangeSource::StatusResponse, now)
            .changed(field, old, new)
            .by(actor)
    };
    let mut audit = Vec::new();

    if let (Some(started), None) = (response.started_on, task.actual_start) {
        audit.push(entry(AuditAction::Updated, "actual_start", String::new(), started.to_string()));
        task.actual_start = Some(started);
        if task.status == WorkStatus::NotStarted {
            task.status = WorkStatus::InProgress;
        }
    }

    match response.reported_status {
        ReportedStatus::Completed => {
            let today = ctx.today();
            audit.push(entry(
                AuditAction::Updated,
                "status",
                task.status.label().to_string(),
                WorkStatus::Completed.label().to_string(),
            ));
            task.status = WorkStatus::Completed;
            task.actual_end = Some(today);
            task.completion_percent = 100;
        }
        ReportedStatus::Blocked => {
            let detail = response.comment.as_deref().unwrap_or("Blocker reported");
            let was = task.flag_for_review.to_string();
            audit.push(entry(AuditAction::Flagged, "flag_for_review", was, "true".into()));
            task.flag(format!("BLOCKED: {detail}"));
        }
        ReportedStatus::Cancelled => {
            let detail =
                response.comment.as_deref().unwrap_or("Owner reported the work is not needed");
            let was = task.flag_for_review.to_string();
            audit.push(entry(AuditAction::Flagged, "flag_for_review", was, "true".into()));
            task.flag(format!("CANCELLATION REQUESTED: {detail}"));
        }
        ReportedStatus::OnTrack | ReportedStatus::Delayed => {}
    }

    if audit.is_empty() {
        return Ok(());
    }
    task.updated_at = now;
    ctx.store.apply(ChangeSet { tasks: vec![task], audit, ..ChangeSet::default() })
}

fn request_approval(
    ctx: &ServiceContext,
    task: &Task,
    response: &StatusResponse,
    answered: &AlertId,
) -> Result<()> {
    let Some(proposed) = response.proposed_new_date else {
        return Ok(());
    };
    let urgency =
        if response.delay_days.unwrap_or(0) > 3 { Urgency::High } else { Urgency::Normal };
    let new = NewAlert {
        recipient: pm_target(ctx, &task.program_id)?.map(|e| e.resource.id),
        level: MAX_ESCALATION_LEVEL,
        urgency,
        parent: Some(answered.clone()),
        related_response: Some(response.id.clone()),
        ..NewAlert::now(ctx, AlertType::ApprovalRequest, proposed)
    };
    let alert = raise_alert(ctx, task, new)?;
    info!(alert = %alert.alert().id, delay = ?response.delay_days, "approval requested");
    Ok(())
}

fn report_blocker(
    ctx: &ServiceContext,
    task: &Task,
    response: &StatusResponse,
    answered: &AlertId,
) -> Result<()> {
    let new = NewAlert {
        recipient: pm_target(ctx, &task.program_id)?.map(|e| e.resource.id),
        level: MAX_ESCALATION_LEVEL,
        urgency: Urgency::Critical,
        reason: Some(BLOCKER_REPORTED.to_string()),
        parent: Some(answered.clone()),
        related_response: Some(response.id.clone()),
        ..NewAlert::now(ctx, AlertType::BlockerReport, ctx.today())
    };
    let alert = raise_alert(ctx, task, new)?;
    info!(alert = %alert.alert().id, "blocker escalated to PM");
    Ok(())
}
