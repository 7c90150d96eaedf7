//! Trigger variants and next-fire computation.
//!
//! A trigger is pure and immutable: `next_fire_after(t)` returns the first
//! boundary strictly after `t`, or `None` once the trigger is exhausted.
//! Cron expressions are the five-field standard; the seconds field required
//! by the `cron` crate is prepended and numeric day-of-week tokens are
//! rewritten to names before compilation, so crate-level numbering quirks
//! never leak into stored jobs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The rule that produces a job's next fire instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Trigger {
    Cron(CronSchedule),
    Interval(IntervalSchedule),
    Date(DateSchedule),
}

impl Trigger {
    /// First boundary strictly after `t`, or `None` when exhausted
    pub fn next_fire_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron(c) => c.next_fire_after(t),
            Trigger::Interval(i) => i.next_fire_after(t),
            Trigger::Date(d) => d.next_fire_after(t),
        }
    }

    /// Check the trigger is well-formed; cron expressions are compiled once
    pub fn validate(&self) -> Result<()> {
        match self {
            Trigger::Cron(c) => {
                c.compiled()?;
                Ok(())
            }
            Trigger::Interval(i) => {
                if i.period_secs() == 0 {
                    return Err(Error::validation("interval period must be positive"));
                }
                Ok(())
            }
            Trigger::Date(_) => Ok(()),
        }
    }

    /// Wire tag used by the export document
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Cron(_) => "cron",
            Trigger::Interval(_) => "interval",
            Trigger::Date(_) => "date",
        }
    }

    /// Explicit serialization; trigger internals stay private to this module
    pub fn serialize(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Explicit deserialization counterpart of [`Trigger::serialize`]
    pub fn deserialize(value: serde_json::Value) -> Result<Self> {
        let trigger: Trigger = serde_json::from_value(value)?;
        trigger.validate()?;
        Ok(trigger)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Cron(c) => write!(f, "cron[{} {}]", c.five_field_expression(), c.timezone),
            Trigger::Interval(i) => write!(f, "interval[{}s]", i.period_secs()),
            Trigger::Date(d) => write!(f, "date[{}]", d.run_date.to_rfc3339()),
        }
    }
}

/// Five-field cron schedule with timezone.
///
/// Built either from a raw `cron_expression` or from the component fields
/// (`hour`, `minute`, `day_of_week`), matching what the create API accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronSchedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<u32>,

    #[serde(default)]
    pub minute: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,

    pub timezone: Tz,
}

impl CronSchedule {
    /// Schedule from component fields; `hour = None` means every hour
    pub fn from_components(
        hour: Option<u32>,
        minute: u32,
        day_of_week: Option<&str>,
        timezone: Tz,
    ) -> Result<Self> {
        if minute > 59 {
            return Err(Error::validation(format!("cron minute out of range: {}", minute)));
        }
        if let Some(h) = hour {
            if h > 23 {
                return Err(Error::validation(format!("cron hour out of range: {}", h)));
            }
        }
        let schedule = Self {
            hour,
            minute,
            day_of_week: day_of_week.map(|s| s.to_string()),
            cron_expression: None,
            timezone,
        };
        schedule.compiled()?;
        Ok(schedule)
    }

    /// Schedule from a raw five-field expression
    pub fn from_expression(expression: &str, timezone: Tz) -> Result<Self> {
        let schedule = Self {
            hour: None,
            minute: 0,
            day_of_week: None,
            cron_expression: Some(expression.to_string()),
            timezone,
        };
        schedule.compiled()?;
        Ok(schedule)
    }

    /// The five-field expression this schedule fires on
    pub fn five_field_expression(&self) -> String {
        match &self.cron_expression {
            Some(expr) => expr.clone(),
            None => {
                let hour = match self.hour {
                    Some(h) => h.to_string(),
                    None => "*".to_string(),
                };
                let dow = match &self.day_of_week {
                    Some(d) => normalize_dow_field(d, DowNumbering::MondayZero)
                        .unwrap_or_else(|_| d.clone()),
                    None => "*".to_string(),
                };
                format!("{} {} * * {}", self.minute, hour, dow)
            }
        }
    }

    fn compiled(&self) -> Result<Schedule> {
        let six_field = match &self.cron_expression {
            Some(expr) => {
                let fields: Vec<&str> = expr.split_whitespace().collect();
                if fields.len() != 5 {
                    return Err(Error::validation(format!(
                        "cron expression must have five fields, got {}: '{}'",
                        fields.len(),
                        expr
                    )));
                }
                let dow = normalize_dow_field(fields[4], DowNumbering::SundayZero)?;
                format!(
                    "0 {} {} {} {} {}",
                    fields[0], fields[1], fields[2], fields[3], dow
                )
            }
            None => {
                let hour = match self.hour {
                    Some(h) => h.to_string(),
                    None => "*".to_string(),
                };
                let dow = match &self.day_of_week {
                    Some(d) => normalize_dow_field(d, DowNumbering::MondayZero)?,
                    None => "*".to_string(),
                };
                format!("0 {} {} * * {}", self.minute, hour, dow)
            }
        };

        Schedule::from_str(&six_field)
            .map_err(|e| Error::validation(format!("unparseable cron expression: {}", e)))
    }

    fn next_fire_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let schedule = self.compiled().ok()?;
        let tz = self.timezone;
        // Iterate over the zone's nominal (naive) clock so DST transitions
        // resolve per policy: a nonexistent instant advances to the first
        // valid instant after the gap, an ambiguous instant fires on the
        // first occurrence only.
        let mut cursor = Utc.from_utc_datetime(&t.with_timezone(&tz).naive_local());
        for _ in 0..8 {
            let nominal = schedule.after(&cursor).next()?;
            let resolved = match tz.from_local_datetime(&nominal.naive_utc()) {
                LocalResult::Single(dt) => Some(dt),
                LocalResult::Ambiguous(first, _) => Some(first),
                LocalResult::None => first_instant_after_gap(tz, nominal.naive_utc()),
            };
            if let Some(instant) = resolved {
                let utc = instant.with_timezone(&Utc);
                if utc > t {
                    return Some(utc);
                }
            }
            cursor = nominal;
        }
        None
    }
}

/// First wall-clock instant at or after a nominal time swallowed by a DST
/// gap. Gaps span whole minutes and at most a few hours.
fn first_instant_after_gap(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    let mut probe = naive;
    for _ in 0..240 {
        probe += Duration::minutes(1);
        match tz.from_local_datetime(&probe) {
            LocalResult::Single(dt) => return Some(dt),
            LocalResult::Ambiguous(first, _) => return Some(first),
            LocalResult::None => continue,
        }
    }
    None
}

/// Which weekday the numeral 0 denotes in a day-of-week field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DowNumbering {
    /// Standard crontab: 0 (and 7) = Sunday
    SundayZero,
    /// Component API: 0 = Monday, matching `mon..sun` ordering
    MondayZero,
}

const DOW_NAMES_SUNDAY_ZERO: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
const DOW_NAMES_MONDAY_ZERO: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Rewrite numeric day-of-week tokens to names, preserving lists, ranges
/// and steps. Name tokens pass through with canonical capitalization.
fn normalize_dow_field(field: &str, numbering: DowNumbering) -> Result<String> {
    let parts: Vec<String> = field
        .split(',')
        .map(|part| normalize_dow_part(part.trim(), numbering))
        .collect::<Result<_>>()?;
    Ok(parts.join(","))
}

fn normalize_dow_part(part: &str, numbering: DowNumbering) -> Result<String> {
    if part == "*" || part == "?" {
        return Ok(part.to_string());
    }
    // Split off a step suffix: `a-b/n`
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (part, None),
    };
    let normalized_range = if range == "*" {
        "*".to_string()
    } else {
        range
            .split('-')
            .map(|token| normalize_dow_token(token, numbering))
            .collect::<Result<Vec<_>>>()?
            .join("-")
    };
    match step {
        Some(step) => Ok(format!("{}/{}", normalized_range, step)),
        None => Ok(normalized_range),
    }
}

fn normalize_dow_token(token: &str, numbering: DowNumbering) -> Result<String> {
    if let Ok(n) = token.parse::<u32>() {
        let name = match numbering {
            DowNumbering::SundayZero => DOW_NAMES_SUNDAY_ZERO
                .get(n as usize)
                .copied()
                .ok_or_else(|| Error::validation(format!("day-of-week out of range: {}", n)))?,
            DowNumbering::MondayZero => DOW_NAMES_MONDAY_ZERO
                .get(n as usize)
                .copied()
                .ok_or_else(|| Error::validation(format!("day-of-week out of range: {}", n)))?,
        };
        return Ok(name.to_string());
    }

    let lower = token.to_ascii_lowercase();
    let canonical = match lower.as_str() {
        "mon" => "Mon",
        "tue" => "Tue",
        "wed" => "Wed",
        "thu" => "Thu",
        "fri" => "Fri",
        "sat" => "Sat",
        "sun" => "Sun",
        _ => {
            return Err(Error::validation(format!(
                "unrecognized day-of-week token: '{}'",
                token
            )))
        }
    };
    Ok(canonical.to_string())
}

/// Fixed-period schedule anchored at a wall-clock instant.
///
/// Boundaries sit at `anchor + k * period` for `k >= 1`; the anchor itself
/// (the job's creation instant by default) is not a boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalSchedule {
    #[serde(default)]
    pub days: u64,

    #[serde(default)]
    pub hours: u64,

    #[serde(default)]
    pub minutes: u64,

    #[serde(default)]
    pub seconds: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<DateTime<Utc>>,
}

impl IntervalSchedule {
    pub fn new(days: u64, hours: u64, minutes: u64, seconds: u64) -> Result<Self> {
        let schedule = Self {
            days,
            hours,
            minutes,
            seconds,
            anchor: None,
        };
        if schedule.period_secs() == 0 {
            return Err(Error::validation(
                "must specify at least one interval component (days, hours, minutes, or seconds)",
            ));
        }
        Ok(schedule)
    }

    /// Pin the anchor; the store keeps it so firings stay phase-aligned
    /// across restarts
    pub fn anchored_at(mut self, anchor: DateTime<Utc>) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn period_secs(&self) -> u64 {
        self.days * 86_400 + self.hours * 3_600 + self.minutes * 60 + self.seconds
    }

    fn period(&self) -> Duration {
        Duration::seconds(self.period_secs() as i64)
    }

    fn next_fire_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let period = self.period();
        if period <= Duration::zero() {
            return None;
        }
        let anchor = self.anchor.unwrap_or(t);
        if t < anchor {
            return Some(anchor + period);
        }
        let elapsed = (t - anchor).num_seconds();
        let k = elapsed.div_euclid(period.num_seconds()) + 1;
        Some(anchor + Duration::seconds(k * period.num_seconds()))
    }
}

/// One-shot schedule: fires once at `run_date`, then exhausts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateSchedule {
    pub run_date: DateTime<Utc>,
}

impl DateSchedule {
    pub fn new(run_date: DateTime<Utc>) -> Self {
        Self { run_date }
    }

    fn next_fire_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if t < self.run_date {
            Some(self.run_date)
        } else {
            None
        }
    }
}
