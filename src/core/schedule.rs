//! Schedule parsing and next occurrence calculation.
//!
//! Supports standard 5-field cron expressions, extended 6-field cron (with
//! seconds), and the usual shortcuts (@daily, @hourly, etc.). Numeric
//! day-of-week values use standard cron numbering: 0-7 with Sunday as both
//! 0 and 7. When both day-of-month and day-of-week are restricted, a day
//! matches if either field matches, as in standard cron.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing schedules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// Invalid cron expression.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// A parsed recurrence bound to a time zone.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// The original expression string.
    expression: String,
    /// The timezone name as given.
    timezone: String,
    tz: Tz,
    /// One recurrence, or two when the day fields are combined with OR.
    recurrences: Vec<CronSchedule>,
}

impl Schedule {
    /// Create a new UTC schedule from a cron expression.
    ///
    /// Supports:
    /// - Standard 5-field cron: `minute hour day month weekday`
    /// - Extended 6-field cron: `second minute hour day month weekday`
    /// - Shortcuts: `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`,
    ///   `@midnight`, `@hourly`
    pub fn new(expression: impl Into<String>) -> Result<Self, ScheduleError> {
        Self::with_timezone(expression, "UTC")
    }

    /// Create a new schedule evaluated in a specific IANA timezone.
    pub fn with_timezone(
        expression: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        let timezone = timezone.into();

        let tz = timezone
            .parse::<Tz>()
            .map_err(|_| ScheduleError::InvalidTimezone(timezone.clone()))?;

        let recurrences = Self::parse_expression(&expression)?;

        Ok(Self {
            expression,
            timezone,
            tz,
            recurrences,
        })
    }

    fn parse_expression(expression: &str) -> Result<Vec<CronSchedule>, ScheduleError> {
        let trimmed = expression.trim();

        if trimmed.starts_with('@') {
            return Self::parse_shortcut(trimmed);
        }

        Self::parse_cron(trimmed)
    }

    fn parse_shortcut(expression: &str) -> Result<Vec<CronSchedule>, ScheduleError> {
        match expression.to_lowercase().as_str() {
            "@yearly" | "@annually" => Self::parse_cron("0 0 1 1 *"),
            "@monthly" => Self::parse_cron("0 0 1 * *"),
            "@weekly" => Self::parse_cron("0 0 * * 0"),
            "@daily" | "@midnight" => Self::parse_cron("0 0 * * *"),
            "@hourly" => Self::parse_cron("0 * * * *"),
            _ => Err(ScheduleError::InvalidCron(format!(
                "unknown shortcut: {}",
                expression
            ))),
        }
    }

    fn parse_cron(expression: &str) -> Result<Vec<CronSchedule>, ScheduleError> {
        let mut fields: Vec<String> = expression.split_whitespace().map(String::from).collect();

        match fields.len() {
            // Standard 5-field cron, add seconds field
            5 => fields.insert(0, "0".to_string()),
            6 => {}
            n => {
                return Err(ScheduleError::InvalidCron(format!(
                    "expected 5 or 6 fields, got {}",
                    n
                )));
            }
        }

        fields[5] = normalize_day_of_week(&fields[5])?;

        let parse = |fields: &[String]| {
            CronSchedule::from_str(&fields.join(" "))
                .map_err(|e| ScheduleError::InvalidCron(format!("{}: {}", expression, e)))
        };

        // The parser requires both day fields to match; standard cron
        // accepts either one when both are restricted.
        if is_restricted(&fields[3]) && is_restricted(&fields[5]) {
            let mut by_month_day = fields.clone();
            by_month_day[5] = "*".to_string();
            let mut by_weekday = fields;
            by_weekday[3] = "*".to_string();
            return Ok(vec![parse(&by_month_day)?, parse(&by_weekday)?]);
        }

        Ok(vec![parse(&fields)?])
    }

    /// First occurrence strictly after `after`, or `None` when the
    /// recurrence has no further occurrences.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.tz);
        self.recurrences
            .iter()
            .filter_map(|cron| cron.after(&local).next())
            .map(|dt| dt.with_timezone(&Utc))
            .min()
    }

    /// The next `n` occurrences strictly after `after`.
    pub fn upcoming(&self, after: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
        std::iter::successors(self.next_after(after), |at| self.next_after(*at))
            .take(n)
            .collect()
    }

    /// Get the original expression string.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Get the timezone name.
    pub fn timezone(&self) -> &str {
        &self.timezone
    }
}

/// Whether a day field narrows the days at all.
fn is_restricted(field: &str) -> bool {
    field != "*" && field != "?"
}

/// Rewrite a day-of-week field from standard cron numbering (Sunday = 0 or 7)
/// into the parser's numbering (Sunday = 1, Saturday = 7).
///
/// Names (`MON`, `SUN-SAT`) and bare wildcards mean the same thing in both
/// numberings and pass through untouched. Numeric items, ranges, and stepped
/// items are expanded into an explicit list of days.
fn normalize_day_of_week(field: &str) -> Result<String, ScheduleError> {
    field
        .split(',')
        .map(normalize_day_item)
        .collect::<Result<Vec<_>, _>>()
        .map(|items| items.join(","))
}

fn normalize_day_item(item: &str) -> Result<String, ScheduleError> {
    let invalid = || ScheduleError::InvalidCron(format!("invalid day-of-week: {}", item));
    let is_number = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    let day = |s: &str| -> Result<u32, ScheduleError> {
        s.parse::<u32>()
            .ok()
            .filter(|d| *d <= 7)
            .ok_or_else(invalid)
    };

    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };

    let (first, last) = match range.split_once('-') {
        Some((a, b)) if is_number(a) && is_number(b) => (day(a)?, day(b)?),
        None if is_number(range) => {
            let d = day(range)?;
            (d, if step.is_some() { 7 } else { d })
        }
        None if range == "*" && step.is_some() => (0, 6),
        _ => return Ok(item.to_string()),
    };

    let step = match step {
        Some(s) => s
            .parse::<usize>()
            .ok()
            .filter(|s| *s > 0)
            .ok_or_else(invalid)?,
        None => 1,
    };

    if first > last {
        return Err(invalid());
    }

    let mut days: Vec<u32> = (first..=last).step_by(step).map(|d| d % 7 + 1).collect();
    days.sort_unstable();
    days.dedup();

    Ok(days
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(","))
}
