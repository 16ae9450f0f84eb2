//! Runtime settings loaded from the environment.
//!
//! Every knob has a named default so that an empty environment yields a
//! working engine. `main` loads `.env` through `dotenvy` before calling
//! [`Settings::from_env`].

use std::path::PathBuf;

use chrono::NaiveTime;

use crate::error::{Error, Result};

/// Default snapshot file used by the CLI.
pub const DEFAULT_STATE_PATH: &str = "tracky-state.yaml";
/// Default start of the business-hours window.
pub const DEFAULT_BUSINESS_HOURS_START: (u32, u32) = (9, 0);
/// Default end of the business-hours window.
pub const DEFAULT_BUSINESS_HOURS_END: (u32, u32) = (17, 0);
/// Default number of days the daily scan looks ahead.
pub const DEFAULT_LOOKAHEAD_DAYS: i64 = 7;
/// Default number of record errors tolerated before an import is aborted.
pub const DEFAULT_MAX_IMPORT_ERRORS: usize = 10;
/// Maximum propagation passes before reporting non-convergence.
pub const DEFAULT_PROPAGATION_MAX_ITERATIONS: usize = 50;
/// Maximum hops any dependency traversal may take.
pub const DEFAULT_MAX_DEPENDENCY_DEPTH: usize = 100;
/// Maximum successor depth explored by impact previews.
pub const DEFAULT_IMPACT_MAX_DEPTH: usize = 10;
/// Hours an alert stays unanswered before its recipient gets one reminder.
pub const REMINDER_AFTER_HOURS: i64 = 2;
/// Default country used for holiday lookups when a resource has none.
pub const DEFAULT_COUNTRY: &str = "US";

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Snapshot file the CLI reads and writes.
    pub state_path: PathBuf,
    /// Start of the daily business-hours window (local time).
    pub business_hours_start: NaiveTime,
    /// End of the daily business-hours window (local time).
    pub business_hours_end: NaiveTime,
    /// Country used when a resource has no country code.
    pub default_country: String,
    /// Days ahead of today scanned for upcoming deadlines.
    pub lookahead_days: i64,
    /// Record errors tolerated before an import aborts.
    pub max_import_errors: usize,
    /// Propagation pass cap.
    pub propagation_max_iterations: usize,
    /// Dependency traversal depth cap.
    pub max_dependency_depth: usize,
    /// Impact preview depth cap.
    pub impact_max_depth: usize,
    /// Organisation-wide fallback PM (resource external id).
    pub default_pm: Option<String>,
    /// Webhook endpoint for the live notifier.
    pub webhook_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            business_hours_start: hm(DEFAULT_BUSINESS_HOURS_START),
            business_hours_end: hm(DEFAULT_BUSINESS_HOURS_END),
            default_country: DEFAULT_COUNTRY.to_string(),
            lookahead_days: DEFAULT_LOOKAHEAD_DAYS,
            max_import_errors: DEFAULT_MAX_IMPORT_ERRORS,
            propagation_max_iterations: DEFAULT_PROPAGATION_MAX_ITERATIONS,
            max_dependency_depth: DEFAULT_MAX_DEPENDENCY_DEPTH,
            impact_max_depth: DEFAULT_IMPACT_MAX_DEPTH,
            default_pm: None,
            webhook_url: None,
        }
    }
}

impl Settings {
    /// Loads settings from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads settings through an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but cannot be parsed, or if the
    /// business-hours window is empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(path) = lookup("TRACKY_STATE") {
            settings.state_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("TRACKY_BUSINESS_HOURS_START") {
            settings.business_hours_start = parse_time("TRACKY_BUSINESS_HOURS_START", &raw)?;
        }
        if let Some(raw) = lookup("TRACKY_BUSINESS_HOURS_END") {
            settings.business_hours_end = parse_time("TRACKY_BUSINESS_HOURS_END", &raw)?;
        }
        if let Some(country) = lookup("TRACKY_DEFAULT_COUNTRY") {
            settings.default_country = country;
        }
        if let Some(raw) = lookup("TRACKY_LOOKAHEAD_DAYS") {
            settings.lookahead_days = parse_number("TRACKY_LOOKAHEAD_DAYS", &raw)?;
        }
        if let Some(raw) = lookup("TRACKY_MAX_IMPORT_ERRORS") {
            settings.max_import_errors = parse_number("TRACKY_MAX_IMPORT_ERRORS", &raw)?;
        }
        if let Some(raw) = lookup("TRACKY_PROPAGATION_MAX_ITERATIONS") {
            settings.propagation_max_iterations =
                parse_number("TRACKY_PROPAGATION_MAX_ITERATIONS", &raw)?;
        }
        settings.default_pm = lookup("TRACKY_DEFAULT_PM").filter(|v| !v.trim().is_empty());
        settings.webhook_url = lookup("TRACKY_WEBHOOK_URL").filter(|v| !v.trim().is_empty());

        if settings.business_hours_start >= settings.business_hours_end {
            return Err(Error::Config(format!(
                "business hours start {} must be before end {}",
                settings.business_hours_start, settings.business_hours_end
            )));
        }
        Ok(settings)
    }
}

fn hm((hour, minute): (u32, u32)) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

fn parse_time(key: &str, raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|e| Error::Config(format!("{key}={raw} is not HH:MM: {e}")))
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| Error::Config(format!("{key}={raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.propagation_max_iterations, 50);
        assert_eq!(settings.business_hours_start, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    }

    #[test]
    fn overrides_are_parsed() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("TRACKY_STATE", "/tmp/state.yaml"),
            ("TRACKY_BUSINESS_HOURS_START", "08:30"),
            ("TRACKY_LOOKAHEAD_DAYS", "14"),
            ("TRACKY_DEFAULT_PM", "pm-1"),
        ]))
        .unwrap();
        assert_eq!(settings.state_path, PathBuf::from("/tmp/state.yaml"));
        assert_eq!(settings.business_hours_start, NaiveTime::from_hms_opt(8, 30, 0).unwrap());
        assert_eq!(settings.lookahead_days, 14);
        assert_eq!(settings.default_pm.as_deref(), Some("pm-1"));
    }

    #[test]
    fn rejects_inverted_business_hours() {
        let err = Settings::from_lookup(lookup_from(&[("TRACKY_BUSINESS_HOURS_END", "08:00")]))
            .unwrap_err();
        assert!(err.to_string().contains("business hours"));
    }

    #[test]
    fn rejects_garbage_numbers() {
        let lookup = lookup_from(&[("TRACKY_MAX_IMPORT_ERRORS", "many")]);
        let err = Settings::from_lookup(lookup).unwrap_err();
        assert!(err.to_string().contains("TRACKY_MAX_IMPORT_ERRORS"));
    }
}
