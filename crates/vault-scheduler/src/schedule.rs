//! Cron expression parsing and next-fire computation (UTC).
//!
//! Accepted forms:
//! - five fields `min hour dom month dow`, or six with a leading seconds field
//! - `*`, `?`, lists `a,b`, ranges `a-b`, steps `*/n`, `a-b/n`, `a/n`
//! - month names `JAN`..`DEC` and weekday names `SUN`..`SAT` (case-insensitive);
//!   weekday `7` is Sunday
//! - descriptors `@yearly` `@annually` `@monthly` `@weekly` `@daily`
//!   `@midnight` `@hourly`, and `@every <n>{s,m,h}`
//!
//! When both day-of-month and day-of-week are restricted a day matches if
//! either does (classic cron behaviour).

use std::fmt;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronParseError {
    #[error("expected 5 or 6 fields, got {0}")]
    FieldCount(usize),

    #[error("invalid {field} value '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("{field} value {value} outside {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("invalid {field} range '{range}'")]
    InvalidRange { field: &'static str, range: String },

    #[error("invalid {field} step '{step}'")]
    InvalidStep { field: &'static str, step: String },

    #[error("unknown descriptor '{0}'")]
    UnknownDescriptor(String),

    #[error("invalid @every interval '{0}'")]
    InvalidInterval(String),
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const MONTH_NAMES: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const DAY_NAMES: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

const SECOND: FieldSpec = FieldSpec { name: "second", min: 0, max: 59, names: &[] };
const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[] };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[] };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[] };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12, names: MONTH_NAMES };
// 7 is accepted as an alias for Sunday and folded onto bit 0.
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7, names: DAY_NAMES };

#[derive(Debug, Clone, PartialEq, Eq)]
struct Fields {
    seconds: u64,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Fields(Box<Fields>),
    Every(StdDuration),
}

/// A parsed cron schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    kind: Kind,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let trimmed = expr.trim();
        let kind = if let Some(descriptor) = trimmed.strip_prefix('@') {
            parse_descriptor(descriptor)?
        } else {
            Kind::Fields(Box::new(parse_fields(trimmed)?))
        };
        Ok(Self {
            source: trimmed.to_string(),
            kind,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The first fire time strictly after `from`, truncated to whole seconds.
    ///
    /// `None` if nothing matches within five years (e.g. `0 0 30 2 *`).
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.kind {
            Kind::Every(every) => Some(from + Duration::from_std(*every).ok()?),
            Kind::Fields(fields) => fields.next_after(from),
        }
    }
}

impl FromStr for CronExpr {
    type Err = CronParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_descriptor(descriptor: &str) -> Result<Kind, CronParseError> {
    let lower = descriptor.to_ascii_lowercase();
    if let Some(interval) = lower.strip_prefix("every") {
        return parse_every(interval.trim()).map(Kind::Every);
    }
    let expanded = match lower.as_str() {
        "yearly" | "annually" => "0 0 0 1 1 *",
        "monthly" => "0 0 0 1 * *",
        "weekly" => "0 0 0 * * 0",
        "daily" | "midnight" => "0 0 0 * * *",
        "hourly" => "0 0 * * * *",
        _ => return Err(CronParseError::UnknownDescriptor(format!("@{descriptor}"))),
    };
    Ok(Kind::Fields(Box::new(parse_fields(expanded)?)))
}

fn parse_every(interval: &str) -> Result<StdDuration, CronParseError> {
    let invalid = || CronParseError::InvalidInterval(interval.to_string());
    let split = interval
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (digits, unit) = interval.split_at(split);
    let n: u64 = digits.parse().map_err(|_| invalid())?;
    let secs = match unit {
        "s" => n,
        "m" => n.checked_mul(60).ok_or_else(invalid)?,
        "h" => n.checked_mul(3600).ok_or_else(invalid)?,
        _ => return Err(invalid()),
    };
    if secs == 0 {
        return Err(invalid());
    }
    Ok(StdDuration::from_secs(secs))
}

fn parse_fields(expr: &str) -> Result<Fields, CronParseError> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    let (sec, rest) = match parts.len() {
        5 => ("0", &parts[..]),
        6 => (parts[0], &parts[1..]),
        n => return Err(CronParseError::FieldCount(n)),
    };
    let mut days_of_week = parse_field(rest[4], &DAY_OF_WEEK)?;
    if days_of_week & (1 << 7) != 0 {
        days_of_week = (days_of_week | 1) & !(1 << 7);
    }
    Ok(Fields {
        seconds: parse_field(sec, &SECOND)?,
        minutes: parse_field(rest[0], &MINUTE)?,
        hours: parse_field(rest[1], &HOUR)?,
        days_of_month: parse_field(rest[2], &DAY_OF_MONTH)?,
        months: parse_field(rest[3], &MONTH)?,
        days_of_week,
        dom_restricted: is_restricted(rest[2]),
        dow_restricted: is_restricted(rest[4]),
    })
}

fn is_restricted(field: &str) -> bool {
    !(field.starts_with('*') || field == "?")
}

/// Parse one field into a bitmask where bit `v` is set if `v` matches.
fn parse_field(field: &str, spec: &FieldSpec) -> Result<u64, CronParseError> {
    let mut mask = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let n: u32 = step.parse().map_err(|_| CronParseError::InvalidStep {
                    field: spec.name,
                    step: step.to_string(),
                })?;
                if n == 0 {
                    return Err(CronParseError::InvalidStep {
                        field: spec.name,
                        step: step.to_string(),
                    });
                }
                (range, Some(n))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" || range == "?" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, spec)?, parse_value(b, spec)?)
        } else {
            let v = parse_value(range, spec)?;
            // `a/n` means "from a to the end of the range, every n".
            if step.is_some() {
                (v, spec.max)
            } else {
                (v, v)
            }
        };
        if lo > hi {
            return Err(CronParseError::InvalidRange {
                field: spec.name,
                range: range.to_string(),
            });
        }
        for v in (lo..=hi).step_by(step.unwrap_or(1) as usize) {
            mask |= 1 << v;
        }
    }
    Ok(mask)
}

fn parse_value(raw: &str, spec: &FieldSpec) -> Result<u32, CronParseError> {
    let value = match raw.parse::<u32>() {
        Ok(v) => v,
        Err(_) => spec
            .names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(raw))
            .map(|idx| spec.min + idx as u32)
            .ok_or_else(|| CronParseError::InvalidValue {
                field: spec.name,
                value: raw.to_string(),
            })?,
    };
    if value < spec.min || value > spec.max {
        return Err(CronParseError::OutOfRange {
            field: spec.name,
            value,
            min: spec.min,
            max: spec.max,
        });
    }
    Ok(value)
}

fn has(mask: u64, v: u32) -> bool {
    mask & (1 << v) != 0
}

fn midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

impl Fields {
    fn day_matches(&self, t: &DateTime<Utc>) -> bool {
        let dom = has(self.days_of_month, t.day());
        let dow = has(self.days_of_week, t.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = from.with_nanosecond(0)? + Duration::seconds(1);
        let limit = from + Duration::days(366 * 5);

        while t <= limit {
            if !has(self.months, t.month()) {
                let (y, m) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0).single()?;
                continue;
            }
            if !self.day_matches(&t) {
                t = midnight(t.date_naive().succ_opt()?)?;
                continue;
            }
            if !has(self.hours, t.hour()) {
                t = t.date_naive().and_hms_opt(t.hour(), 0, 0)?.and_utc() + Duration::hours(1);
                continue;
            }
            if !has(self.minutes, t.minute()) {
                t = t.date_naive().and_hms_opt(t.hour(), t.minute(), 0)?.and_utc()
                    + Duration::minutes(1);
                continue;
            }
            if !has(self.seconds, t.second()) {
                t += Duration::seconds(1);
                continue;
            }
            return Some(t);
        }
        None
    }
}
