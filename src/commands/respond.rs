//! `tracky respond`, `approve` and `reject` commands.

use chrono::NaiveDate;

use super::{parse_reason, print_json, Workspace};
use crate::escalation::{process_approval, submit_response, Decision};
use crate::model::{ReportedStatus, ResponseId, ResponseSubmission};

/// What the responder typed.
#[derive(Debug, Clone, Copy)]
pub struct Answer<'a> {
    /// Reported status.
    pub status: ReportedStatus,
    /// Proposed new end date.
    pub new_date: Option<NaiveDate>,
    /// Raw delay reason.
    pub reason: Option<&'a str>,
    /// Free-form comment.
    pub comment: Option<&'a str>,
    /// Actual start date.
    pub started_on: Option<NaiveDate>,
    /// Idempotency key.
    pub key: Option<&'a str>,
}

/// Execute the `respond` command.
///
/// # Errors
///
/// Returns an error string for unusable tokens, incomplete answers or
/// storage failures.
pub fn respond(ws: &Workspace, token: &str, answer: Answer<'_>) -> Result<bool, String> {
    let submission = ResponseSubmission {
        reported_status: Some(answer.status),
        proposed_new_date: answer.new_date,
        reason: answer.reason.map(parse_reason).transpose()?,
        comment: answer.comment.map(str::to_string),
        started_on: answer.started_on,
    };
    let response =
        submit_response(&ws.ctx, token, submission, answer.key).map_err(|e| e.to_string())?;
    print_json(&response)?;
    Ok(true)
}

/// Execute the `approve` or `reject` command.
///
/// # Errors
///
/// Returns an error string if the response is unknown, already decided or
/// superseded.
pub fn decide(
    ws: &Workspace,
    response: &str,
    approve: bool,
    actor: &str,
    reason: Option<&str>,
) -> Result<bool, String> {
    let decision = if approve { Decision::Approve } else { Decision::Reject };
    let outcome = process_approval(&ws.ctx, &ResponseId::new(response), decision, actor, reason)
        .map_err(|e| e.to_string())?;
    print_json(&outcome)?;
    Ok(true)
}
