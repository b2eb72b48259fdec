// Schedule parsing and recurrence tracking
//
// Jobs are scheduled with standard five-field cron expressions
// (minute hour day-of-month month day-of-week) with POSIX semantics. The
// `cron` crate works with second precision, numbers weekdays differently and
// requires day-of-month and day-of-week to match together, so expressions are
// translated before parsing.

use crate::errors::ScheduleError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;
use std::str::FromStr;

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// A parsed five-field cron schedule
///
/// When both day-of-month and day-of-week are restricted, a day matches if
/// either field matches. That case is held as two `cron` schedules whose
/// instances are merged.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    primary: cron::Schedule,
    alternate: Option<cron::Schedule>,
}

impl CronSchedule {
    /// Whether day-of-month and day-of-week are matched independently
    pub fn matches_either_day(&self) -> bool {
        self.alternate.is_some()
    }
}

/// Parse and validate a five-field cron expression
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    let invalid = |reason: String| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason,
    };

    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
    }
    let (minute, hour, day_of_month, month) = (fields[0], fields[1], fields[2], fields[3]);

    let day_of_week = translate_day_of_week(fields[4]).map_err(invalid)?;
    let build = |dom: &str, dow: &str| {
        cron::Schedule::from_str(&format!("0 {} {} {} {} {}", minute, hour, dom, month, dow))
            .map_err(|e| invalid(e.to_string()))
    };

    // A field starting with '*' leaves the day unrestricted, as in cron(8)
    if is_restricted(day_of_month) && is_restricted(fields[4]) {
        Ok(CronSchedule {
            primary: build(day_of_month, "*")?,
            alternate: Some(build("*", &day_of_week)?),
        })
    } else {
        Ok(CronSchedule {
            primary: build(day_of_month, &day_of_week)?,
            alternate: None,
        })
    }
}

fn is_restricted(field: &str) -> bool {
    !(field.starts_with('*') || field == "?")
}

/// Rewrite a day-of-week field as an explicit list of day names
///
/// Accepts numbers 0-7 (Sunday is 0 or 7), three-letter names, lists,
/// ranges and steps.
fn translate_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok("*".to_string());
    }

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| format!("invalid day-of-week step '{}'", step))?;
                (range, step)
            }
            None => (item, 1),
        };

        let (start, end) = match range.split_once('-') {
            _ if range == "*" => (0, 6),
            Some((start, end)) => (day_number(start)?, day_number(end)?),
            // `n/step` runs to the end of the week
            None if step > 1 => (day_number(range)?, 7),
            None => {
                let day = day_number(range)?;
                (day, day)
            }
        };
        if start > end {
            return Err(format!("day-of-week range '{}' is inverted", range));
        }

        days.extend((start..=end).step_by(step as usize).map(|day| day % 7));
    }

    Ok(days
        .into_iter()
        .map(|day| DAY_NAMES[day as usize])
        .collect::<Vec<_>>()
        .join(","))
}

fn day_number(value: &str) -> Result<u32, String> {
    if let Ok(number) = value.parse::<u32>() {
        return if number <= 7 {
            Ok(number)
        } else {
            Err(format!("day-of-week {} is out of range 0-7", number))
        };
    }

    DAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(value))
        .map(|index| index as u32)
        .ok_or_else(|| format!("unknown day-of-week '{}'", value))
}

/// Parse an IANA timezone name
pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    Tz::from_str(name).map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

/// Schedules are evaluated in UTC unless configured otherwise
pub fn default_timezone() -> Tz {
    chrono_tz::UTC
}

/// Next recurrence instance strictly after `after`, evaluated in `timezone`
pub fn next_after(
    schedule: &CronSchedule,
    timezone: Tz,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    let reference_in_tz = after.with_timezone(&timezone);
    let next_of = |s: &cron::Schedule| s.after(&reference_in_tz).next();

    let primary = next_of(&schedule.primary);
    let alternate = schedule.alternate.as_ref().and_then(next_of);

    primary
        .into_iter()
        .chain(alternate)
        .min()
        .map(|next| next.with_timezone(&Utc))
        .ok_or_else(|| ScheduleError::NoNextExecution {
            after: after.to_rfc3339(),
        })
}


/// A recurrence instance that is due for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueInstance {
    pub instance: DateTime<Utc>,
    /// Earlier instances that elapsed without firing and were coalesced
    pub missed: u32,
}

/// RecurrenceTracker decides when a scheduled run is due
///
/// Each recurrence instance is reported at most once. When several instances
/// elapsed between two polls only the latest fires.
#[derive(Debug, Clone)]
pub struct RecurrenceTracker {
    schedule: CronSchedule,
    timezone: Tz,
    next_due: DateTime<Utc>,
}

impl RecurrenceTracker {
    /// Start tracking from `start`; the first instance is strictly after it
    pub fn new(expression: &str, timezone: Tz, start: DateTime<Utc>) -> Result<Self, ScheduleError> {
        let schedule = parse_cron_expression(expression)?;
        let next_due = next_after(&schedule, timezone, start)?;

        Ok(Self {
            schedule,
            timezone,
            next_due,
        })
    }

    pub fn next_due(&self) -> DateTime<Utc> {
        self.next_due
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Report the instance to run at `now`, if any, and advance past it
    pub fn poll(&mut self, now: DateTime<Utc>) -> Result<Option<DueInstance>, ScheduleError> {
        if now < self.next_due {
            return Ok(None);
        }

        let mut instance = self.next_due;
        let mut missed = 0;
        loop {
            let following = next_after(&self.schedule, self.timezone, instance)?;
            if following > now {
                self.next_due = following;
                break;
            }
            instance = following;
            missed += 1;
        }

        Ok(Some(DueInstance { instance, missed }))
    }
}
