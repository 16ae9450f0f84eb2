//! Status-check alerts and their lifecycle.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AlertId, ProgramId, ResourceId, ResponseId, TaskId};
use crate::error::{Error, Result};

/// Highest escalation level (program PM).
pub const MAX_ESCALATION_LEVEL: u8 = 3;

/// What an alert asks of its recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    /// Routine pre-deadline status check.
    StatusCheck,
    /// A status check re-routed up the chain.
    Escalation,
    /// A reported blocker, sent to the PM.
    BlockerReport,
    /// A delay awaiting PM approval.
    ApprovalRequest,
    /// Informational notice.
    Notification,
    /// Informational notice about a changed schedule.
    ScheduleChange,
}

/// Lifecycle state of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    /// Created, not yet handed to the notifier.
    Pending,
    /// Handed to the notifier.
    Sent,
    /// Delivery confirmed.
    Delivered,
    /// Opened by the recipient.
    Opened,
    /// A response was received.
    Responded,
    /// Timed out and escalated.
    Expired,
    /// Withdrawn.
    Cancelled,
}

impl AlertStatus {
    /// States from which no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Responded | Self::Expired | Self::Cancelled)
    }

    /// States that are waiting on the recipient and subject to timeouts.
    #[must_use]
    pub fn is_awaiting_response(self) -> bool {
        matches!(self, Self::Sent | Self::Delivered | Self::Opened)
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use AlertStatus::{Cancelled, Delivered, Expired, Opened, Pending, Responded, Sent};
        matches!(
            (self, next),
            (Pending, Sent | Cancelled | Responded)
                | (Sent, Delivered | Opened | Responded | Expired | Cancelled)
                | (Delivered, Opened | Responded | Expired | Cancelled)
                | (Opened, Responded | Expired | Cancelled)
        )
    }
}

/// How close the deadline is when the alert is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    /// Due today or overdue.
    Critical,
    /// Due tomorrow.
    High,
    /// Due within three days.
    Normal,
    /// Due later.
    Low,
}

impl Urgency {
    /// Classifies a deadline relative to `today`.
    #[must_use]
    pub fn for_deadline(deadline: NaiveDate, today: NaiveDate) -> Self {
        let days_until = (deadline - today).num_days();
        match days_until {
            i64::MIN..=0 => Self::Critical,
            1 => Self::High,
            2..=3 => Self::Normal,
            _ => Self::Low,
        }
    }
}

/// A request for a status update, routed through the escalation chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Alert id.
    pub id: AlertId,
    /// Task the alert concerns.
    pub task_id: TaskId,
    /// Program of that task.
    pub program_id: ProgramId,
    /// Deadline being checked.
    pub deadline: NaiveDate,
    /// Alert kind.
    pub alert_type: AlertType,
    /// Who the alert was meant for (the task owner).
    pub intended_recipient_id: Option<ResourceId>,
    /// Who actually receives it after chain resolution.
    pub actual_recipient_id: Option<ResourceId>,
    /// Position in the escalation chain, 0..=3.
    pub escalation_level: u8,
    /// Lifecycle state.
    pub status: AlertStatus,
    /// Deadline proximity at creation.
    pub urgency: Urgency,
    /// Earliest dispatch time.
    pub scheduled_send_at: DateTime<Utc>,
    /// When the notifier accepted it.
    pub sent_at: Option<DateTime<Utc>>,
    /// Delivery receipt time.
    pub delivered_at: Option<DateTime<Utc>>,
    /// Open receipt time.
    pub opened_at: Option<DateTime<Utc>>,
    /// Response time.
    pub responded_at: Option<DateTime<Utc>>,
    /// Expiry time.
    pub expired_at: Option<DateTime<Utc>>,
    /// Cancellation time.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// When the sweep escalates an unanswered alert.
    pub escalation_timeout_at: Option<DateTime<Utc>>,
    /// Alert this one was escalated from.
    pub parent_alert_id: Option<AlertId>,
    /// No automatic recipient could be found.
    pub requires_manual_intervention: bool,
    /// Why the alert is not at level 0, if it isn't.
    pub escalation_reason: Option<String>,
    /// Resources skipped during chain resolution, with reasons.
    pub skipped_recipients: Vec<String>,
    /// Last notifier failure.
    pub last_error: Option<String>,
    /// Failed dispatch attempts.
    pub retry_count: u32,
    /// Delivery id returned by the notifier.
    pub delivery_id: Option<String>,
    /// Response this alert was raised for (approval requests, blocker reports).
    pub related_response_id: Option<ResponseId>,
    /// When a reminder went out. At most one per alert.
    #[serde(default)]
    pub reminder_sent_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Moves the alert to `next`, stamping the matching timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStateTransition`] when the move is not allowed.
    pub fn transition(&mut self, next: AlertStatus, at: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: format!("{:?}", self.status),
                to: format!("{next:?}"),
                reason: format!("alert {}", self.id),
            });
        }
        match next {
            AlertStatus::Sent => self.sent_at = Some(at),
            AlertStatus::Delivered => self.delivered_at = Some(at),
            AlertStatus::Opened => self.opened_at = Some(at),
            AlertStatus::Responded => self.responded_at = Some(at),
            AlertStatus::Expired => self.expired_at = Some(at),
            AlertStatus::Cancelled => self.cancelled_at = Some(at),
            AlertStatus::Pending => {}
        }
        if next.is_terminal() {
            self.escalation_timeout_at = None;
        }
        self.status = next;
        Ok(())
    }

    /// The uniqueness key among non-terminal alerts.
    #[must_use]
    pub fn dedup_key(&self) -> (TaskId, NaiveDate, AlertType) {
        (self.task_id.clone(), self.deadline, self.alert_type)
    }
}
