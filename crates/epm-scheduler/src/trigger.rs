//! When a job fires.

use chrono::{DateTime, Days, Local, NaiveTime, TimeZone, Utc};
use epm_common::{ProcessError, ProcessResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Firing rule of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Fire once at an absolute instant
    At(DateTime<Utc>),
    /// Fire repeatedly, first one interval after submission
    Every(Duration),
    /// Fire every day at this local wall-clock time
    DailyAt(NaiveTime),
}

impl Trigger {
    /// One-shot trigger `delay` from now.
    pub fn once_after(delay: Duration) -> ProcessResult<Self> {
        let at = Utc::now()
            .checked_add_signed(to_chrono(delay)?)
            .ok_or_else(|| out_of_range(delay))?;
        Ok(Trigger::At(at))
    }

    /// Daily trigger from an `"HH:MM"` or `"HH:MM:SS"` string.
    pub fn daily(time_str: &str) -> ProcessResult<Self> {
        parse_time_of_day(time_str).map(Trigger::DailyAt)
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Trigger::At(_))
    }

    /// First firing time for a job submitted at `now`.
    ///
    /// Fails with `InvalidTrigger` for a one-shot in the past, a zero
    /// interval, or an interval that runs past the end of the calendar.
    pub fn first_run(&self, now: DateTime<Utc>) -> ProcessResult<DateTime<Utc>> {
        match *self {
            Trigger::At(at) => {
                if at < now {
                    return Err(ProcessError::invalid_trigger(format!(
                        "one-shot time {} is {}ms in the past",
                        at,
                        (now - at).num_milliseconds()
                    )));
                }
                Ok(at)
            }
            Trigger::Every(every) => {
                if every.is_zero() {
                    return Err(ProcessError::invalid_trigger("interval must be greater than zero"));
                }
                now.checked_add_signed(to_chrono(every)?)
                    .ok_or_else(|| out_of_range(every))
            }
            Trigger::DailyAt(time) => daily_occurrence(&Local, time, now, true).ok_or_else(|| {
                ProcessError::invalid_trigger(format!("no local occurrence of {}", time))
            }),
        }
    }

    /// Next firing time after a firing that was scheduled for `scheduled`
    /// and evaluated at `now`. `None` for one-shot triggers.
    ///
    /// The result is always later than `now`; occurrences missed while the
    /// loop was behind are skipped rather than fired in a burst.
    pub fn next_after(
        &self,
        scheduled: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match *self {
            Trigger::At(_) => None,
            Trigger::Every(every) => next_interval(scheduled, every, now),
            Trigger::DailyAt(time) => daily_occurrence(&Local, time, scheduled.max(now), false),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::At(at) => write!(f, "at {}", at),
            Trigger::Every(every) => write!(f, "every {:?}", every),
            Trigger::DailyAt(time) => write!(f, "daily at {}", time.format("%H:%M:%S")),
        }
    }
}

/// Parse `"HH:MM"` or `"HH:MM:SS"`.
pub fn parse_time_of_day(time_str: &str) -> ProcessResult<NaiveTime> {
    let trimmed = time_str.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|_| {
            ProcessError::invalid_trigger(format!(
                "'{}' is not a time of day (expected HH:MM or HH:MM:SS)",
                time_str
            ))
        })
}

fn out_of_range(duration: Duration) -> ProcessError {
    ProcessError::invalid_trigger(format!("{:?} is out of range", duration))
}

fn to_chrono(duration: Duration) -> ProcessResult<chrono::Duration> {
    chrono::Duration::from_std(duration).map_err(|_| out_of_range(duration))
}

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Smallest whole number of `every` steps past `scheduled` that lands after
/// `now`. `None` when the result does not fit in a `DateTime`.
fn next_interval(
    scheduled: DateTime<Utc>,
    every: Duration,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let step_ns = i128::try_from(every.as_nanos()).ok().filter(|ns| *ns > 0)?;
    let behind = now.signed_duration_since(scheduled);
    let behind_ns = match behind.num_nanoseconds() {
        Some(ns) => i128::from(ns),
        None => i128::from(behind.num_milliseconds()).checked_mul(1_000_000)?,
    }
    .max(0);

    let steps = (behind_ns / step_ns).checked_add(1)?;
    let offset_ns = steps.checked_mul(step_ns)?;
    let secs = i64::try_from(offset_ns / NANOS_PER_SEC).ok()?;
    let nanos = i64::try_from(offset_ns % NANOS_PER_SEC).ok()?;
    let offset = chrono::Duration::try_seconds(secs)?
        .checked_add(&chrono::Duration::nanoseconds(nanos))?;

    let next = scheduled.checked_add_signed(offset)?;
    // The millisecond fallback above can come up short by less than a step
    if next <= now {
        return next.checked_add_signed(to_chrono(every).ok()?);
    }
    Some(next)
}

/// First occurrence of `time` in `tz` after (or at, when `inclusive`)
/// `not_before`. Looks a few days ahead because a DST gap can swallow one
/// day's occurrence.
fn daily_occurrence<Tz: TimeZone>(
    tz: &Tz,
    time: NaiveTime,
    not_before: DateTime<Utc>,
    inclusive: bool,
) -> Option<DateTime<Utc>> {
    let start_date = not_before.with_timezone(tz).date_naive();
    for offset in 0..3 {
        let date = start_date.checked_add_days(Days::new(offset))?;
        let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest() else {
            continue;
        };
        let candidate = candidate.with_timezone(&Utc);
        if candidate > not_before || (inclusive && candidate == not_before) {
            return Some(candidate);
        }
    }
    None
}
