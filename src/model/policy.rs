//! Per-program escalation policy.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::ids::ProgramId;

/// How and when status checks escalate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Program the policy applies to; `None` is the global fallback.
    pub program_id: Option<ProgramId>,
    /// Business days before the deadline that the check goes out.
    pub days_before_deadline: u32,
    /// Local time of day alerts are sent.
    pub alert_time: NaiveTime,
    /// Business-hour timeout per escalation level; `None` never times out.
    pub level_timeout_hours: [Option<u32>; 4],
    /// Delays up to this many days are approved automatically.
    pub auto_approve_delay_up_to_days: i64,
    /// Blockers go straight to the PM.
    pub blocker_immediate_escalation: bool,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            program_id: None,
            days_before_deadline: 1,
            alert_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            level_timeout_hours: [Some(4), Some(4), Some(2), None],
            auto_approve_delay_up_to_days: 0,
            blocker_immediate_escalation: true,
        }
    }
}

impl EscalationPolicy {
    /// Timeout for an escalation level.
    #[must_use]
    pub fn timeout_hours(&self, level: u8) -> Option<u32> {
        self.level_timeout_hours.get(usize::from(level)).copied().flatten()
    }
}
