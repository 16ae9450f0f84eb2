//! Business-day and business-hour arithmetic.
//!
//! A [`BusinessCalendar`] knows the company holidays (global or per country)
//! and the daily business-hours window. All functions are pure over the
//! calendar and their arguments; timestamps are stored in UTC and converted
//! to the recipient's timezone only for the arithmetic.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::{Error, Result};

/// Calendar days any walk may cover before giving up.
pub const SAFETY_WINDOW_DAYS: i64 = 30;

/// A non-working day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    /// The date.
    pub date: NaiveDate,
    /// Country the holiday applies to; `None` applies everywhere.
    #[serde(default)]
    pub country_code: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

/// Holidays plus the daily business-hours window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessCalendar {
    holidays: Vec<Holiday>,
    hours_start: NaiveTime,
    hours_end: NaiveTime,
}

impl Default for BusinessCalendar {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl BusinessCalendar {
    /// Creates a calendar with the configured business hours and no holidays.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            holidays: Vec::new(),
            hours_start: settings.business_hours_start,
            hours_end: settings.business_hours_end,
        }
    }

    /// Adds holidays to the calendar.
    #[must_use]
    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = Holiday>) -> Self {
        self.holidays.extend(holidays);
        self
    }

    /// Parses a YAML list of holidays.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the YAML is malformed.
    pub fn parse_holidays(yaml: &str) -> Result<Vec<Holiday>> {
        serde_yaml::from_str(yaml).map_err(|e| Error::Config(format!("invalid holiday list: {e}")))
    }

    /// Whether `date` is a holiday in `country` (company-wide holidays always count).
    #[must_use]
    pub fn is_holiday(&self, date: NaiveDate, country: Option<&str>) -> bool {
        self.holidays.iter().any(|h| {
            h.date == date && (h.country_code.is_none() || h.country_code.as_deref() == country)
        })
    }

    /// Weekdays that are not holidays.
    #[must_use]
    pub fn is_business_day(&self, date: NaiveDate, country: Option<&str>) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.is_holiday(date, country)
    }

    /// The date `n` business days before `date`; `n == 0` is `date` itself.
    ///
    /// Returns `None` if the walk runs past the safety window (e.g. a holiday
    /// list covering every day).
    #[must_use]
    pub fn business_days_before(
        &self,
        date: NaiveDate,
        n: u32,
        country: Option<&str>,
    ) -> Option<NaiveDate> {
        if n == 0 {
            return Some(date);
        }
        let window = SAFETY_WINDOW_DAYS + 3 * i64::from(n);
        let mut cursor = date;
        let mut counted = 0;
        for _ in 0..window {
            cursor = cursor.pred_opt()?;
            if self.is_business_day(cursor, country) {
                counted += 1;
                if counted == n {
                    return Some(cursor);
                }
            }
        }
        None
    }

    /// Whether `ts` falls on a business day inside the business-hours window
    /// in timezone `tz`.
    #[must_use]
    pub fn is_business_hour(&self, ts: DateTime<Utc>, tz: Tz, country: Option<&str>) -> bool {
        let local = ts.with_timezone(&tz);
        let time = local.time();
        self.is_business_day(local.date_naive(), country)
            && time >= self.hours_start
            && time < self.hours_end
    }

    /// Adds `hours` business hours to `start`, skipping nights, weekends and
    /// holidays in `tz`.
    ///
    /// Returns `None` if the result would lie beyond the safety window.
    #[must_use]
    pub fn add_business_hours(
        &self,
        start: DateTime<Utc>,
        hours: u32,
        tz: Tz,
        country: Option<&str>,
    ) -> Option<DateTime<Utc>> {
        let limit = start + Duration::days(SAFETY_WINDOW_DAYS);
        let mut remaining = Duration::hours(i64::from(hours));
        let mut cursor = start;

        while remaining > Duration::zero() {
            if cursor > limit {
                return None;
            }
            if self.is_business_hour(cursor, tz, country) {
                let local_date = cursor.with_timezone(&tz).date_naive();
                let window_end = local_to_utc(tz, local_date, self.hours_end)?;
                let available = window_end - cursor;
                if available <= Duration::zero() {
                    return None;
                }
                if available >= remaining {
                    return Some(cursor + remaining);
                }
                remaining -= available;
                cursor = window_end;
            } else {
                cursor = self.next_window_open(cursor, tz, country)?;
            }
        }
        (cursor <= limit).then_some(cursor)
    }

    /// `local_time` on the first business day on or after `from`'s local
    /// date in `tz`, converted to UTC.
    #[must_use]
    pub fn next_business_day_at_time(
        &self,
        from: DateTime<Utc>,
        local_time: NaiveTime,
        tz: Tz,
        country: Option<&str>,
    ) -> Option<DateTime<Utc>> {
        let mut date = from.with_timezone(&tz).date_naive();
        for _ in 0..=SAFETY_WINDOW_DAYS {
            if self.is_business_day(date, country) {
                return local_to_utc(tz, date, local_time);
            }
            date = date.succ_opt()?;
        }
        None
    }

    /// `local_time` on the day `n` business days before `deadline`, in UTC.
    #[must_use]
    pub fn send_time_before(
        &self,
        deadline: NaiveDate,
        n: u32,
        local_time: NaiveTime,
        tz: Tz,
        country: Option<&str>,
    ) -> Option<DateTime<Utc>> {
        let date = self.business_days_before(deadline, n, country)?;
        local_to_utc(tz, date, local_time)
    }

    fn next_window_open(
        &self,
        cursor: DateTime<Utc>,
        tz: Tz,
        country: Option<&str>,
    ) -> Option<DateTime<Utc>> {
        let local = cursor.with_timezone(&tz);
        let mut date = local.date_naive();
        if !(self.is_business_day(date, country) && local.time() < self.hours_start) {
            date = date.succ_opt()?;
        }
        for _ in 0..=SAFETY_WINDOW_DAYS {
            if self.is_business_day(date, country) {
                return local_to_utc(tz, date, self.hours_start);
            }
            date = date.succ_opt()?;
        }
        None
    }
}

/// Parses an IANA timezone name, falling back to UTC for unknown names.
#[must_use]
pub fn parse_timezone(name: &str) -> Tz {
    name.parse().unwrap_or_else(|_| {
        tracing::warn!(timezone = name, "unknown timezone, using UTC");
        Tz::UTC
    })
}

/// Converts a local wall-clock time to UTC. Ambiguous times (DST fall-back)
/// take the earlier instant; nonexistent times (DST spring-forward) move one
/// hour later.
fn local_to_utc(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|local| local.with_timezone(&Utc))
}
