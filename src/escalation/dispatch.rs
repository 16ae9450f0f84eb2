//! Hands due alerts and reminders to the notifier and records delivery
//! receipts.

use chrono::Duration;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::tokens::{hash_token, issue_token};
use super::{escalation_deadline, locale};
use crate::config::REMINDER_AFTER_HOURS;
use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::model::{Alert, AlertId, AlertStatus, AlertType, ProgramId, Resource, Task};
use crate::ports::notifier::{Channel, Notification};

/// What happened to one due alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    /// The alert.
    pub alert_id: AlertId,
    /// Address the notification went to.
    pub recipient: Option<String>,
    /// Whether the notifier accepted it.
    pub sent: bool,
    /// Notifier delivery id.
    pub delivery_id: Option<String>,
    /// Raw magic-link token carried by the notification, for alerts that ask
    /// for a response.
    pub token: Option<String>,
    /// Why nothing was sent.
    pub error: Option<String>,
}

impl DispatchOutcome {
    fn skipped(alert: &Alert, error: impl Into<String>) -> Self {
        Self {
            alert_id: alert.id.clone(),
            recipient: None,
            sent: false,
            delivery_id: None,
            token: None,
            error: Some(error.into()),
        }
    }
}

/// A notification ready to go out, built under the program lock.
struct Outgoing {
    alert_id: AlertId,
    program_id: ProgramId,
    address: String,
    notification: Notification,
    token: Option<String>,
}

enum Prepared {
    /// The alert changed since it was listed.
    Gone,
    Skipped(DispatchOutcome),
    Ready(Outgoing),
}

/// Sends every Pending alert whose scheduled time has come.
///
/// Alerts on completed or cancelled tasks are cancelled instead of sent.
/// Notifier failures leave the alert Pending with `last_error` and
/// `retry_count` updated, so the next run retries it; the token minted for
/// the failed attempt is revoked.
///
/// Each alert is re-read under its program lock before sending and again
/// before the outcome is recorded. The notifier call itself runs outside
/// the lock.
///
/// # Errors
///
/// Returns a storage error.
#[instrument(skip_all)]
pub async fn dispatch_pending_alerts(ctx: &ServiceContext) -> Result<Vec<DispatchOutcome>> {
    let now = ctx.clock.now();
    let mut due: Vec<Alert> = ctx
        .store
        .alerts_with_status(&[AlertStatus::Pending])?
        .into_iter()
        .filter(|a| a.scheduled_send_at <= now)
        .collect();
    due.sort_by(|a, b| (a.scheduled_send_at, &a.id).cmp(&(b.scheduled_send_at, &b.id)));

    let mut outcomes = Vec::with_capacity(due.len());
    for listed in due {
        let prepared = ctx.locks.with_program(&listed.program_id, || prepare(ctx, &listed.id))?;
        match prepared {
            Prepared::Gone => {}
            Prepared::Skipped(outcome) => outcomes.push(outcome),
            Prepared::Ready(outgoing) => outcomes.push(send_one(ctx, outgoing).await?),
        }
    }

    let sent = outcomes.iter().filter(|o| o.sent).count();
    info!(due = outcomes.len(), sent, "alert dispatch finished");
    Ok(outcomes)
}

fn prepare(ctx: &ServiceContext, id: &AlertId) -> Result<Prepared> {
    let now = ctx.clock.now();
    let fresh = ctx.store.alert(id)?;
    let Some(mut alert) =
        fresh.filter(|a| a.status == AlertStatus::Pending && a.scheduled_send_at <= now)
    else {
        return Ok(Prepared::Gone);
    };

    let task = ctx.store.task(&alert.task_id)?;
    let Some(task) = task.filter(Task::is_open) else {
        alert.transition(AlertStatus::Cancelled, now)?;
        ctx.store.update_alert(&alert)?;
        info!(alert = %alert.id, "alert cancelled, task is closed");
        return Ok(Prepared::Skipped(DispatchOutcome::skipped(&alert, "task is closed")));
    };
    let recipient = match &alert.actual_recipient_id {
        Some(id) => ctx.store.resource(id)?,
        None => None,
    };
    let Some(recipient) = recipient else {
        warn!(alert = %alert.id, "alert has no recipient, left for manual handling");
        return Ok(Prepared::Skipped(DispatchOutcome::skipped(&alert, "no recipient")));
    };

    let token = if asks_for_response(alert.alert_type) {
        Some(issue_token(ctx, &alert, &recipient.id)?)
    } else {
        None
    };
    let address = address_of(&recipient);
    let notification = Notification {
        recipient: address.clone(),
        channel: Channel::Email,
        template: template(alert.alert_type).to_string(),
        payload: payload(&alert, &task, token.as_deref()),
    };
    Ok(Prepared::Ready(Outgoing {
        alert_id: alert.id,
        program_id: alert.program_id,
        address,
        notification,
        token,
    }))
}

async fn send_one(ctx: &ServiceContext, outgoing: Outgoing) -> Result<DispatchOutcome> {
    let delivery = ctx.notifier.send(&outgoing.notification).await.map_err(|e| e.to_string());
    let program = outgoing.program_id.clone();
    ctx.locks.with_program(&program, || record_attempt(ctx, outgoing, delivery))
}

/// Applies a send result to the alert. Callers hold its program lock.
fn record_attempt(
    ctx: &ServiceContext,
    outgoing: Outgoing,
    delivery: std::result::Result<String, String>,
) -> Result<DispatchOutcome> {
    let Outgoing { alert_id, address, token, .. } = outgoing;
    let mut outcome = DispatchOutcome {
        alert_id: alert_id.clone(),
        recipient: Some(address.clone()),
        sent: false,
        delivery_id: None,
        token: None,
        error: None,
    };
    let revoke = |token: Option<&str>| -> Result<()> {
        match token {
            Some(raw) => ctx.store.revoke_token(&hash_token(raw)),
            None => Ok(()),
        }
    };

    let fresh = ctx.store.alert(&alert_id)?;
    let Some(mut alert) = fresh.filter(|a| a.status == AlertStatus::Pending) else {
        revoke(token.as_deref())?;
        warn!(alert = %alert_id, "alert changed while sending, outcome dropped");
        outcome.sent = delivery.is_ok();
        outcome.error = Some("alert changed while sending".to_string());
        return Ok(outcome);
    };

    match delivery {
        Ok(delivery_id) => {
            let now = ctx.clock.now();
            alert.transition(AlertStatus::Sent, now)?;
            alert.delivery_id = Some(delivery_id.clone());
            alert.last_error = None;
            if asks_for_response(alert.alert_type) {
                let recipient = match &alert.actual_recipient_id {
                    Some(id) => ctx.store.resource(id)?,
                    None => None,
                };
                let policy = ctx.store.escalation_policy(Some(&alert.program_id))?;
                alert.escalation_timeout_at = escalation_deadline(
                    ctx,
                    &policy,
                    alert.escalation_level,
                    now,
                    recipient.as_ref(),
                );
            }
            info!(alert = %alert.id, recipient = %address, delivery = %delivery_id, "alert sent");
            outcome.sent = true;
            outcome.delivery_id = Some(delivery_id);
            outcome.token = token;
        }
        Err(err) => {
            revoke(token.as_deref())?;
            alert.retry_count += 1;
            alert.last_error = Some(err.clone());
            warn!(
                alert = %alert.id,
                retries = alert.retry_count,
                error = %err,
                "alert delivery failed"
            );
            outcome.error = Some(err);
        }
    }
    ctx.store.update_alert(&alert)?;
    Ok(outcome)
}

/// Sends one reminder for each alert left unanswered for
/// [`REMINDER_AFTER_HOURS`] since it went out.
///
/// Runs only on the recipient's business days. A reminder carries no new
/// token; the link from the original alert stays valid. Failed reminders
/// are retried on the next run.
///
/// # Errors
///
/// Returns a storage error.
#[instrument(skip_all)]
pub async fn send_reminders(ctx: &ServiceContext) -> Result<Vec<DispatchOutcome>> {
    let mut due: Vec<Alert> = ctx
        .store
        .alerts_with_status(&[AlertStatus::Sent, AlertStatus::Delivered, AlertStatus::Opened])?
        .into_iter()
        .filter(|a| needs_reminder(ctx, a))
        .collect();
    due.sort_by(|a, b| a.id.cmp(&b.id));

    let mut outcomes = Vec::new();
    for listed in due {
        let prepared =
            ctx.locks.with_program(&listed.program_id, || prepare_reminder(ctx, &listed.id))?;
        let Some(outgoing) = prepared else {
            continue;
        };
        let delivery = ctx.notifier.send(&outgoing.notification).await;
        let program = outgoing.program_id.clone();
        let outcome = ctx.locks.with_program(&program, || {
            let mut outcome = DispatchOutcome {
                alert_id: outgoing.alert_id.clone(),
                recipient: Some(outgoing.address.clone()),
                sent: false,
                delivery_id: None,
                token: None,
                error: None,
            };
            match delivery {
                Ok(delivery_id) => {
                    if let Some(mut alert) = ctx.store.alert(&outgoing.alert_id)? {
                        alert.reminder_sent_at = Some(ctx.clock.now());
                        ctx.store.update_alert(&alert)?;
                    }
                    info!(alert = %outgoing.alert_id, delivery = %delivery_id, "reminder sent");
                    outcome.sent = true;
                    outcome.delivery_id = Some(delivery_id);
                }
                Err(err) => {
                    warn!(alert = %outgoing.alert_id, error = %err, "reminder delivery failed");
                    outcome.error = Some(err.to_string());
                }
            }
            Ok(outcome)
        })?;
        outcomes.push(outcome);
    }

    let sent = outcomes.iter().filter(|o| o.sent).count();
    info!(due = outcomes.len(), sent, "reminder run finished");
    Ok(outcomes)
}

fn needs_reminder(ctx: &ServiceContext, alert: &Alert) -> bool {
    let cutoff = ctx.clock.now() - Duration::hours(REMINDER_AFTER_HOURS);
    alert.status.is_awaiting_response()
        && asks_for_response(alert.alert_type)
        && alert.reminder_sent_at.is_none()
        && alert.sent_at.is_some_and(|sent| sent <= cutoff)
}

fn prepare_reminder(ctx: &ServiceContext, id: &AlertId) -> Result<Option<Outgoing>> {
    let Some(alert) = ctx.store.alert(id)?.filter(|a| needs_reminder(ctx, a)) else {
        return Ok(None);
    };
    let Some(task) = ctx.store.task(&alert.task_id)?.filter(Task::is_open) else {
        return Ok(None);
    };
    let recipient = match &alert.actual_recipient_id {
        Some(id) => ctx.store.resource(id)?,
        None => None,
    };
    let Some(recipient) = recipient else {
        return Ok(None);
    };
    let (tz, country) = locale(ctx, Some(&recipient));
    let local_today = ctx.clock.now().with_timezone(&tz).date_naive();
    if !ctx.calendar.is_business_day(local_today, country) {
        info!(alert = %alert.id, day = %local_today, "reminder held, not a business day");
        return Ok(None);
    }

    let address = address_of(&recipient);
    let notification = Notification {
        recipient: address.clone(),
        channel: Channel::Email,
        template: REMINDER_TEMPLATE.to_string(),
        payload: payload(&alert, &task, None),
    };
    Ok(Some(Outgoing {
        alert_id: alert.id,
        program_id: alert.program_id,
        address,
        notification,
        token: None,
    }))
}

fn asks_for_response(alert_type: AlertType) -> bool {
    matches!(alert_type, AlertType::StatusCheck | AlertType::Escalation)
}

fn address_of(recipient: &Resource) -> String {
    recipient.email.clone().unwrap_or_else(|| recipient.external_id.clone())
}

fn payload(alert: &Alert, task: &Task, token: Option<&str>) -> serde_json::Value {
    json!({
        "alert_id": alert.id,
        "task": task.external_id,
        "task_name": task.name,
        "deadline": alert.deadline,
        "urgency": alert.urgency,
        "escalation_level": alert.escalation_level,
        "escalation_reason": alert.escalation_reason,
        "token": token,
    })
}

const REMINDER_TEMPLATE: &str = "reminder";

fn template(alert_type: AlertType) -> &'static str {
    match alert_type {
        AlertType::StatusCheck => "status_check",
        AlertType::Escalation => "escalation",
        AlertType::BlockerReport => "blocker_report",
        AlertType::ApprovalRequest => "approval_request",
        AlertType::Notification => "notification",
        AlertType::ScheduleChange => "schedule_change",
    }
}

/// Records a delivery receipt.
///
/// # Errors
///
/// Returns [`Error::NotFound`] for an unknown alert or
/// [`Error::InvalidStateTransition`] if the alert is not Sent.
pub fn record_delivery(ctx: &ServiceContext, alert: &AlertId) -> Result<Alert> {
    advance(ctx, alert, AlertStatus::Delivered)
}

/// Records that the recipient opened the alert.
///
/// # Errors
///
/// Returns [`Error::NotFound`] for an unknown alert or
/// [`Error::InvalidStateTransition`] if the alert was not sent or is closed.
pub fn record_open(ctx: &ServiceContext, alert: &AlertId) -> Result<Alert> {
    advance(ctx, alert, AlertStatus::Opened)
}

fn advance(ctx: &ServiceContext, id: &AlertId, next: AlertStatus) -> Result<Alert> {
    let mut alert = ctx.store.alert(id)?.ok_or_else(|| Error::not_found("alert", id))?;
    alert.transition(next, ctx.clock.now())?;
    ctx.store.update_alert(&alert)?;
    Ok(alert)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::run_daily_scan;
    use crate::escalation::sweep;
    use crate::escalation::tokens::check_token;
    use crate::model::{TaskId, WorkStatus};
    use crate::store::ChangeSet;
    use crate::test_support::{at, context_at, march_task, owned_by, staffed, stored};

    fn only_alert(ctx: &ServiceContext, task: &str) -> Alert {
        ctx.store.alerts_for_task(&TaskId::new(task)).unwrap().remove(0)
    }

    #[tokio::test]
    async fn nothing_goes_out_before_its_send_time() {
        let (ctx, _, notifier) = context_at(at(3, 3, 8));
        staffed(&ctx, vec![owned_by(march_task("A", 2, 10), "owner")], vec![]);
        run_daily_scan(&ctx).unwrap();

        assert!(dispatch_pending_alerts(&ctx).await.unwrap().is_empty());
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn due_alert_is_sent_with_a_token_and_a_business_hour_timeout() {
        let (ctx, clock, notifier) = context_at(at(3, 3, 8));
        staffed(&ctx, vec![owned_by(march_task("A", 2, 10), "owner")], vec![]);
        run_daily_scan(&ctx).unwrap();

        clock.set(at(3, 9, 9));
        let outcomes = dispatch_pending_alerts(&ctx).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].sent);

        let sent = notifier.sent();
        assert_eq!(sent[0].recipient, "owner@example.com");
        assert_eq!(sent[0].template, "status_check");
        let token = outcomes[0].token.clone().unwrap();
        assert_eq!(sent[0].payload["token"], token.as_str());
        assert!(ctx.store.token(&hash_token(&token)).unwrap().is_some());

        let alert = only_alert(&ctx, "A");
        assert_eq!(alert.status, AlertStatus::Sent);
        assert_eq!(alert.sent_at, Some(at(3, 9, 9)));
        assert_eq!(alert.escalation_timeout_at, Some(at(3, 9, 13)));
    }

    #[tokio::test]
    async fn late_afternoon_timeout_rolls_into_next_business_day() {
        let (ctx, clock, _) = context_at(at(3, 3, 8));
        staffed(&ctx, vec![owned_by(march_task("A", 2, 10), "owner")], vec![]);
        run_daily_scan(&ctx).unwrap();

        clock.set(at(3, 9, 15));
        dispatch_pending_alerts(&ctx).await.unwrap();
        assert_eq!(only_alert(&ctx, "A").escalation_timeout_at, Some(at(3, 10, 11)));
    }

    #[tokio::test]
    async fn failures_are_recorded_and_retried() {
        let (ctx, clock, notifier) = context_at(at(3, 3, 8));
        staffed(&ctx, vec![owned_by(march_task("A", 2, 10), "owner")], vec![]);
        run_daily_scan(&ctx).unwrap();
        clock.set(at(3, 9, 9));

        notifier.set_failing(true);
        let outcomes = dispatch_pending_alerts(&ctx).await.unwrap();
        assert!(!outcomes[0].sent);
        let alert = only_alert(&ctx, "A");
        assert_eq!(alert.status, AlertStatus::Pending);
        assert_eq!(alert.retry_count, 1);
        assert_eq!(alert.last_error.as_deref(), Some("notifier unavailable"));

        notifier.set_failing(false);
        dispatch_pending_alerts(&ctx).await.unwrap();
        let alert = only_alert(&ctx, "A");
        assert_eq!(alert.status, AlertStatus::Sent);
        assert_eq!(alert.last_error, None);
        assert_eq!(alert.retry_count, 1);
    }

    #[tokio::test]
    async fn alerts_on_closed_tasks_are_cancelled_not_sent() {
        let (ctx, clock, notifier) = context_at(at(3, 3, 8));
        staffed(&ctx, vec![owned_by(march_task("A", 2, 10), "owner")], vec![]);
        run_daily_scan(&ctx).unwrap();

        let mut task = stored(&ctx, "A");
        task.status = WorkStatus::Completed;
        ctx.store.apply(ChangeSet { tasks: vec![task], ..ChangeSet::default() }).unwrap();

        clock.set(at(3, 9, 9));
        let outcomes = dispatch_pending_alerts(&ctx).await.unwrap();
        assert_eq!(outcomes[0].error.as_deref(), Some("task is closed"));
        assert!(notifier.sent().is_empty());
        assert_eq!(only_alert(&ctx, "A").status, AlertStatus::Cancelled);
    }

    #[tokio::test]
    async fn receipts_advance_the_state() {
        let (ctx, clock, _) = context_at(at(3, 3, 8));
        staffed(&ctx, vec![owned_by(march_task("A", 2, 10), "owner")], vec![]);
        run_daily_scan(&ctx).unwrap();
        let id = only_alert(&ctx, "A").id;

        assert!(matches!(record_delivery(&ctx, &id), Err(Error::InvalidStateTransition { .. })));

        clock.set(at(3, 9, 9));
        dispatch_pending_alerts(&ctx).await.unwrap();
        assert_eq!(record_delivery(&ctx, &id).unwrap().status, AlertStatus::Delivered);
        let opened = record_open(&ctx, &id).unwrap();
        assert_eq!(opened.status, AlertStatus::Opened);
        assert!(opened.escalation_timeout_at.is_some());
    }

    #[tokio::test]
    async fn failed_send_revokes_the_token_it_carried() {
        let (ctx, clock, notifier) = context_at(at(3, 3, 8));
        staffed(&ctx, vec![owned_by(march_task("A", 2, 10), "owner")], vec![]);
        run_daily_scan(&ctx).unwrap();
        clock.set(at(3, 9, 9));

        let id = only_alert(&ctx, "A").id;
        let Prepared::Ready(outgoing) = prepare(&ctx, &id).unwrap() else {
            panic!("alert should be ready to send");
        };
        let burned = outgoing.token.clone().unwrap();
        let outcome = record_attempt(&ctx, outgoing, Err("smtp down".into())).unwrap();
        assert!(!outcome.sent);
        assert_eq!(outcome.token, None);
        assert!(ctx.store.token(&hash_token(&burned)).unwrap().unwrap().revoked);
        assert!(matches!(check_token(&ctx, &burned), Err(Error::TokenAlreadyUsed)));

        let retry = dispatch_pending_alerts(&ctx).await.unwrap();
        let fresh = retry[0].token.clone().unwrap();
        assert_ne!(fresh, burned);
        assert_eq!(notifier.sent()[0].payload["token"], fresh.as_str());
        assert!(check_token(&ctx, &fresh).is_ok());
    }

    #[tokio::test]
    async fn alert_cancelled_while_sending_keeps_its_new_state() {
        let (ctx, clock, _) = context_at(at(3, 3, 8));
        staffed(&ctx, vec![owned_by(march_task("A", 2, 10), "owner")], vec![]);
        run_daily_scan(&ctx).unwrap();
        clock.set(at(3, 9, 9));

        let id = only_alert(&ctx, "A").id;
        let Prepared::Ready(outgoing) = prepare(&ctx, &id).unwrap() else {
            panic!("alert should be ready to send");
        };
        let raw = outgoing.token.clone().unwrap();

        let mut task = stored(&ctx, "A");
        task.status = WorkStatus::Completed;
        ctx.store.apply(ChangeSet { tasks: vec![task], ..ChangeSet::default() }).unwrap();
        assert_eq!(sweep(&ctx).unwrap().cancelled, vec![id.clone()]);

        let outcome = record_attempt(&ctx, outgoing, Ok("delivery-9".into())).unwrap();
        assert_eq!(outcome.error.as_deref(), Some("alert changed while sending"));
        let alert = only_alert(&ctx, "A");
        assert_eq!(alert.status, AlertStatus::Cancelled);
        assert_eq!(alert.delivery_id, None);
        assert!(ctx.store.token(&hash_token(&raw)).unwrap().unwrap().revoked);
        assert!(matches!(prepare(&ctx, &id).unwrap(), Prepared::Gone));
    }

    #[tokio::test]
    async fn one_reminder_after_two_unanswered_hours() {
        let (ctx, clock, notifier) = context_at(at(3, 3, 8));
        staffed(&ctx, vec![owned_by(march_task("A", 2, 10), "owner")], vec![]);
        run_daily_scan(&ctx).unwrap();
        clock.set(at(3, 9, 9));
        dispatch_pending_alerts(&ctx).await.unwrap();

        clock.set(at(3, 9, 10));
        assert!(send_reminders(&ctx).await.unwrap().is_empty());

        clock.set(at(3, 9, 11));
        let reminders = send_reminders(&ctx).await.unwrap();
        assert_eq!(reminders.len(), 1);
        assert!(reminders[0].sent);
        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].template, "reminder");
        assert!(sent[1].payload["token"].is_null());
        let alert = only_alert(&ctx, "A");
        assert_eq!(alert.reminder_sent_at, Some(at(3, 9, 11)));
        assert_eq!(alert.status, AlertStatus::Sent);

        clock.set(at(3, 9, 12));
        assert!(send_reminders(&ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reminders_wait_for_a_business_day() {
        let (ctx, clock, notifier) = context_at(at(3, 3, 8));
        staffed(&ctx, vec![owned_by(march_task("A", 2, 9), "owner")], vec![]);
        run_daily_scan(&ctx).unwrap();
        clock.set(at(3, 6, 9));
        assert!(dispatch_pending_alerts(&ctx).await.unwrap()[0].sent);

        clock.set(at(3, 7, 12));
        assert!(send_reminders(&ctx).await.unwrap().is_empty());

        clock.set(at(3, 9, 8));
        assert_eq!(send_reminders(&ctx).await.unwrap().len(), 1);
        assert_eq!(notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn answered_alerts_get_no_reminder() {
        let (ctx, clock, _) = context_at(at(3, 3, 8));
        staffed(&ctx, vec![owned_by(march_task("A", 2, 10), "owner")], vec![]);
        run_daily_scan(&ctx).unwrap();
        clock.set(at(3, 9, 9));
        dispatch_pending_alerts(&ctx).await.unwrap();
        let mut alert = only_alert(&ctx, "A");
        alert.transition(AlertStatus::Responded, at(3, 9, 10)).unwrap();
        ctx.store.update_alert(&alert).unwrap();

        clock.set(at(3, 9, 15));
        assert!(send_reminders(&ctx).await.unwrap().is_empty());
    }
}
