//! Delay reasons and the duration arithmetic each one implies.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Why a task is late, with the details each category needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DelayReason {
    /// More work than planned.
    ScopeIncrease {
        /// Additional work as a percentage of the original.
        additional_work_percent: f64,
    },
    /// Work began after the forecast start; the window shifts.
    StartedLate,
    /// The assignee lost capacity to other work.
    ResourcePulled {
        /// Effort still available, as a percentage.
        available_effort_percent: f64,
    },
    /// A technical problem is blocking progress.
    TechnicalBlocker {
        /// Free-form description.
        description: Option<String>,
    },
    /// Waiting on a party outside the program.
    ExternalDependency {
        /// Who is being waited on.
        party: Option<String>,
    },
    /// Requirements changed.
    SpecificationChange {
        /// Free-form description.
        description: Option<String>,
    },
    /// Rework after a quality problem.
    QualityIssue {
        /// Free-form description.
        description: Option<String>,
    },
    /// Anything else.
    Other {
        /// Free-form description.
        description: Option<String>,
    },
}

/// How a proposed end date was turned into new forecast dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalculationMethod {
    /// Duration scaled by the scope increase.
    ScopePercentage,
    /// Whole window shifted, duration preserved.
    WindowShift,
    /// Duration divided by the remaining capacity.
    ReducedCapacity,
    /// End date taken as proposed.
    DirectExtension,
}

/// New forecast dates derived from a delay reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationRecalculation {
    /// Recalculated start.
    pub new_start: NaiveDate,
    /// Recalculated end.
    pub new_end: NaiveDate,
    /// Duration before the change, in days.
    pub original_duration_days: i64,
    /// Duration after the change, in days.
    pub new_duration_days: i64,
    /// How the dates were derived.
    pub method: CalculationMethod,
    /// Human-readable explanation.
    pub explanation: String,
}

impl DelayReason {
    /// Category label as used in reports.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::ScopeIncrease { .. } => "SCOPE_INCREASE",
            Self::StartedLate => "STARTED_LATE",
            Self::ResourcePulled { .. } => "RESOURCE_PULLED",
            Self::TechnicalBlocker { .. } => "TECHNICAL_BLOCKER",
            Self::ExternalDependency { .. } => "EXTERNAL_DEPENDENCY",
            Self::SpecificationChange { .. } => "SPECIFICATION_CHANGE",
            Self::QualityIssue { .. } => "QUALITY_ISSUE",
            Self::Other { .. } => "OTHER",
        }
    }

    /// Derives new forecast dates for a task currently planned
    /// `start..end` whose owner proposes `proposed_end`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn recalculate(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        proposed_end: NaiveDate,
    ) -> DurationRecalculation {
        let original = (end - start).num_days();
        match self {
            Self::ScopeIncrease { additional_work_percent: pct } if *pct > 0.0 => {
                let scaled = (original as f64 * (1.0 + pct / 100.0)).floor() as i64;
                let new_end = proposed_end.max(start + Duration::days(scaled));
                let new_duration = (new_end - start).num_days();
                DurationRecalculation {
                    new_start: start,
                    new_end,
                    original_duration_days: original,
                    new_duration_days: new_duration,
                    method: CalculationMethod::ScopePercentage,
                    explanation: format!(
                        "Scope increased by {pct}%. Duration {original} -> {new_duration} days"
                    ),
                }
            }
            Self::StartedLate => {
                let shift = (proposed_end - end).num_days();
                DurationRecalculation {
                    new_start: start + Duration::days(shift),
                    new_end: proposed_end,
                    original_duration_days: original,
                    new_duration_days: original,
                    method: CalculationMethod::WindowShift,
                    explanation: format!(
                        "Started late. Window shifted by {shift} days, duration kept at {original}"
                    ),
                }
            }
            Self::ResourcePulled { available_effort_percent: pct }
                if *pct > 0.0 && *pct < 100.0 =>
            {
                let stretched = (original as f64 / (pct / 100.0)).floor() as i64;
                let new_end = proposed_end.max(start + Duration::days(stretched));
                let new_duration = (new_end - start).num_days();
                DurationRecalculation {
                    new_start: start,
                    new_end,
                    original_duration_days: original,
                    new_duration_days: new_duration,
                    method: CalculationMethod::ReducedCapacity,
                    explanation: format!(
                        "Resource at {pct}% capacity. Duration {original} -> {new_duration} days"
                    ),
                }
            }
            _ => {
                let new_duration = (proposed_end - start).num_days();
                DurationRecalculation {
                    new_start: start,
                    new_end: proposed_end,
                    original_duration_days: original,
                    new_duration_days: new_duration,
                    method: CalculationMethod::DirectExtension,
                    explanation: format!(
                        "Direct extension ({}). New end {proposed_end} (+{} days)",
                        self.category(),
                        new_duration - original
                    ),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, month, day).unwrap()
    }

    #[test]
    fn scope_increase_takes_later_of_scaled_and_proposed() {
        let reason = DelayReason::ScopeIncrease { additional_work_percent: 50.0 };
        let recalc = reason.recalculate(d(3, 1), d(3, 11), d(3, 13));
        assert_eq!(recalc.new_end, d(3, 16));
        assert_eq!(recalc.new_duration_days, 15);
        assert_eq!(recalc.method, CalculationMethod::ScopePercentage);

        let recalc = reason.recalculate(d(3, 1), d(3, 11), d(3, 20));
        assert_eq!(recalc.new_end, d(3, 20));
    }

    #[test]
    fn started_late_shifts_the_window() {
        let recalc = DelayReason::StartedLate.recalculate(d(3, 1), d(3, 11), d(3, 14));
        assert_eq!(recalc.new_start, d(3, 4));
        assert_eq!(recalc.new_end, d(3, 14));
        assert_eq!(recalc.new_duration_days, 10);
    }

    #[test]
    fn resource_pulled_stretches_duration() {
        let reason = DelayReason::ResourcePulled { available_effort_percent: 50.0 };
        let recalc = reason.recalculate(d(3, 1), d(3, 11), d(3, 12));
        assert_eq!(recalc.new_end, d(3, 21));
        assert_eq!(recalc.method, CalculationMethod::ReducedCapacity);
    }

    #[test]
    fn full_capacity_falls_back_to_direct_extension() {
        let reason = DelayReason::ResourcePulled { available_effort_percent: 100.0 };
        let recalc = reason.recalculate(d(3, 1), d(3, 11), d(3, 12));
        assert_eq!(recalc.new_end, d(3, 12));
        assert_eq!(recalc.method, CalculationMethod::DirectExtension);
    }

    #[test]
    fn reasons_are_tagged_by_category() {
        let json = serde_json::to_value(DelayReason::ExternalDependency {
            party: Some("Vendor".into()),
        })
        .unwrap();
        assert_eq!(json["category"], "EXTERNAL_DEPENDENCY");
        assert_eq!(json["party"], "Vendor");
    }
}
