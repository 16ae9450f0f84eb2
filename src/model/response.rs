//! Versioned status responses and the magic-link tokens that authorise them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AlertId, ResourceId, ResponseId, TaskId};
use super::reason::DelayReason;

/// Status reported by a task owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportedStatus {
    /// Deadline will be met.
    OnTrack,
    /// Deadline will slip.
    Delayed,
    /// Work cannot proceed.
    Blocked,
    /// Work is done.
    Completed,
    /// Work should not happen.
    Cancelled,
}

/// Approval sub-state of a response that implies a plan change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    /// Waiting for a PM decision.
    Pending,
    /// Approved by a PM.
    Approved,
    /// Rejected by a PM.
    Rejected,
    /// Within policy; applied without review.
    AutoApproved,
}

/// What a responder submits through a magic link.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseSubmission {
    /// Reported status.
    pub reported_status: Option<ReportedStatus>,
    /// Proposed new end date for delays.
    pub proposed_new_date: Option<NaiveDate>,
    /// Why the task is late.
    pub reason: Option<DelayReason>,
    /// Free-text comment.
    pub comment: Option<String>,
    /// Date work actually started, if the responder reports it.
    pub started_on: Option<NaiveDate>,
}

/// An append-only, versioned status response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Response id.
    pub id: ResponseId,
    /// Alert answered.
    pub alert_id: AlertId,
    /// Task reported on.
    pub task_id: TaskId,
    /// Who responded.
    pub responder_id: ResourceId,
    /// Strictly increasing per task, starting at 1.
    pub response_version: u32,
    /// Whether this is the task's newest response.
    pub is_latest: bool,
    /// Version of the response that replaced this one.
    pub superseded_by_version: Option<u32>,
    /// Reported status.
    pub reported_status: ReportedStatus,
    /// Proposed end date.
    pub proposed_new_date: Option<NaiveDate>,
    /// `proposed_new_date - current_end` at submission time.
    pub delay_days: Option<i64>,
    /// Why the task is late.
    pub reason: Option<DelayReason>,
    /// Free-text comment.
    pub comment: Option<String>,
    /// Reported start date.
    pub started_on: Option<NaiveDate>,
    /// Approval state, present when the response implies a plan change.
    pub approval: Option<ApprovalStatus>,
    /// Who decided the approval.
    pub approved_by: Option<String>,
    /// When the approval was decided.
    pub approved_at: Option<DateTime<Utc>>,
    /// Rejection reason.
    pub rejection_reason: Option<String>,
    /// Whether the implied plan change has been handled.
    pub processed: bool,
    /// When it was handled.
    pub processed_at: Option<DateTime<Utc>>,
    /// Client-supplied key guarding against duplicate submission.
    pub idempotency_key: String,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
}

/// A single-use magic-link token. Only the hash is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseToken {
    /// Hex SHA-256 of the raw token.
    pub token_hash: String,
    /// Alert the token answers.
    pub alert_id: AlertId,
    /// Task the token is bound to.
    pub task_id: TaskId,
    /// Resource the token was issued to.
    pub resource_id: ResourceId,
    /// End of validity.
    pub expires_at: DateTime<Utc>,
    /// When the token was consumed.
    pub used_at: Option<DateTime<Utc>>,
    /// Set when the token can no longer be used.
    pub revoked: bool,
    /// Issue time.
    pub created_at: DateTime<Utc>,
}
