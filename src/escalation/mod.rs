//! Escalation state machine: status-check alerts, their delivery and
//! timeouts, magic-link responses and the approval workflow.
//!
//! The daily scan raises one alert per (task, deadline); dispatch hands due
//! alerts to the notifier; the sweep cancels alerts on closed work and moves
//! unanswered ones up the chain (primary, backup, manager, PM). Responses
//! arrive through single-use tokens and may feed an approved slip back into
//! the scheduler.

pub mod approval;
pub mod chain;
pub mod dispatch;
pub mod impact;
pub mod responses;
pub mod scan;
pub mod sweep;
pub mod tokens;

pub use approval::{process_approval, ApprovalOutcome, Decision};
pub use chain::{find_available, resolve_escalation_chain, ChainEntry, ChainRole, Resolution};
pub use dispatch::{
    dispatch_pending_alerts, record_delivery, record_open, send_reminders, DispatchOutcome,
};
pub use impact::{preview_impact, AffectedTask, ImpactAnalysis, ResourceConflict, RiskLevel};
pub use responses::submit_response;
pub use scan::{run_daily_scan, ScanSummary};
pub use sweep::{sweep, EscalationStep, SweepSummary};
pub use tokens::hash_token;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::calendar::parse_timezone;
use crate::context::ServiceContext;
use crate::error::Result;
use crate::model::{
    Alert, AlertId, AlertStatus, AlertType, EscalationPolicy, Resource, ResourceId,
    ResponseId, Task, Urgency,
};
use crate::store::AlertInsert;

/// Escalation reason on alerts routed past an unavailable owner.
pub const PRIMARY_UNAVAILABLE: &str = "PRIMARY_UNAVAILABLE";
/// Escalation reason when the whole chain is unavailable.
pub const NO_AVAILABLE_RECIPIENT: &str = "NO_AVAILABLE_RECIPIENT";
/// Escalation reason for sweep-driven escalations.
pub const TIMEOUT_NO_RESPONSE: &str = "TIMEOUT_NO_RESPONSE";
/// Reason recorded when the sweep closes an alert past its deadline day.
pub const DEADLINE_PASSED: &str = "DEADLINE_PASSED";
/// Escalation reason for blocker reports.
pub const BLOCKER_REPORTED: &str = "BLOCKER_REPORTED";

/// Fields that vary between the alert kinds the engine raises.
pub(crate) struct NewAlert {
    pub(crate) alert_type: AlertType,
    pub(crate) deadline: NaiveDate,
    pub(crate) recipient: Option<ResourceId>,
    pub(crate) level: u8,
    pub(crate) urgency: Urgency,
    pub(crate) send_at: DateTime<Utc>,
    pub(crate) reason: Option<String>,
    pub(crate) skipped: Vec<String>,
    pub(crate) parent: Option<AlertId>,
    pub(crate) related_response: Option<ResponseId>,
    pub(crate) manual: bool,
}

impl NewAlert {
    /// An alert for `task` due to go out immediately.
    pub(crate) fn now(ctx: &ServiceContext, alert_type: AlertType, deadline: NaiveDate) -> Self {
        Self {
            alert_type,
            deadline,
            recipient: None,
            level: 0,
            urgency: Urgency::for_deadline(deadline, ctx.today()),
            send_at: ctx.clock.now(),
            reason: None,
            skipped: Vec::new(),
            parent: None,
            related_response: None,
            manual: false,
        }
    }
}

/// Builds and inserts an alert for `task`, returning the existing one when
/// the (task, deadline, type) key is already taken.
pub(crate) fn raise_alert(ctx: &ServiceContext, task: &Task, new: NewAlert) -> Result<AlertInsert> {
    let alert = Alert {
        id: AlertId::new(ctx.id_gen.generate_id("alert")),
        task_id: task.id.clone(),
        program_id: task.program_id.clone(),
        deadline: new.deadline,
        alert_type: new.alert_type,
        intended_recipient_id: task.resource_id.clone(),
        actual_recipient_id: new.recipient,
        escalation_level: new.level,
        status: AlertStatus::Pending,
        urgency: new.urgency,
        scheduled_send_at: new.send_at,
        sent_at: None,
        delivered_at: None,
        opened_at: None,
        responded_at: None,
        expired_at: None,
        cancelled_at: None,
        escalation_timeout_at: None,
        parent_alert_id: new.parent,
        requires_manual_intervention: new.manual,
        escalation_reason: new.reason,
        skipped_recipients: new.skipped,
        last_error: None,
        retry_count: 0,
        delivery_id: None,
        related_response_id: new.related_response,
        reminder_sent_at: None,
        created_at: ctx.clock.now(),
    };
    ctx.store.insert_alert(alert)
}

/// When an alert sent at `sent_at` to `recipient` should escalate, counting
/// business hours in the recipient's timezone. `None` at levels that never
/// time out.
pub(crate) fn escalation_deadline(
    ctx: &ServiceContext,
    policy: &EscalationPolicy,
    level: u8,
    sent_at: DateTime<Utc>,
    recipient: Option<&Resource>,
) -> Option<DateTime<Utc>> {
    let hours = policy.timeout_hours(level)?;
    let (tz, country) = locale(ctx, recipient);
    ctx.calendar
        .add_business_hours(sent_at, hours, tz, country)
        .or_else(|| Some(sent_at + Duration::hours(i64::from(hours))))
}

/// Timezone and holiday country for a recipient, falling back to UTC and the
/// configured default country.
pub(crate) fn locale<'a>(
    ctx: &'a ServiceContext,
    recipient: Option<&'a Resource>,
) -> (Tz, Option<&'a str>) {
    let tz = recipient.map_or(Tz::UTC, |r| parse_timezone(&r.timezone));
    let country = recipient
        .and_then(|r| r.country_code.as_deref())
        .unwrap_or(ctx.settings.default_country.as_str());
    (tz, Some(country))
}
