//! Cron-style time windows.
//!
//! A schedule is five whitespace-separated fields: minute (0-59), hour (0-23),
//! day of month (1-31), month (1-12) and day of week (0-6, 0 = Sunday, 7 is
//! accepted as Sunday too). Each field is `*` or a comma-separated list of
//! values, inclusive `a-b` ranges, and `/n` steps (`*/15`, `8-18/2`, `5/10`).
//!
//! Fields are evaluated against wall-clock time in the instant's own time zone.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Upper bound on search steps taken by [`CronSchedule::next_match`].
/// Impossible field combinations (day 31 in February only) hit this bound.
pub const MAX_NEXT_MATCH_STEPS: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),
    #[error("invalid {field} field '{value}'")]
    InvalidField { field: &'static str, value: String },
}

/// One cron field as a bit set of the values it admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    mask: u64,
}

impl Field {
    fn parse(name: &'static str, text: &str, min: u32, max: u32) -> Result<Self, CronError> {
        let invalid = || CronError::InvalidField {
            field: name,
            value: text.to_string(),
        };
        let value = |s: &str| {
            s.parse::<u32>()
                .ok()
                .filter(|v| (min..=max).contains(v))
                .ok_or_else(invalid)
        };

        let mut mask = 0u64;
        for part in text.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step = step.parse::<u32>().ok().filter(|s| *s > 0);
                    (range, Some(step.ok_or_else(invalid)?))
                }
                None => (part, None),
            };
            let (start, end) = if range == "*" {
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                (value(a)?, value(b)?)
            } else {
                let v = value(range)?;
                // `5/10` runs from 5 to the top of the field
                if step.is_some() { (v, max) } else { (v, v) }
            };
            if start > end {
                return Err(invalid());
            }
            mask |= range_mask(start, end, step.unwrap_or(1));
        }
        Ok(Field { mask })
    }

    fn contains(&self, value: u32) -> bool {
        value < 64 && self.mask & (1 << value) != 0
    }

    /// Smallest admitted value in `from..=max`.
    fn next_from(&self, from: u32, max: u32) -> Option<u32> {
        (from..=max).find(|v| self.contains(*v))
    }
}

fn range_mask(start: u32, end: u32, step: u32) -> u64 {
    (start..=end)
        .step_by(step as usize)
        .fold(0, |mask, v| mask | (1 << v))
}

/// A parsed five-field schedule expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    source: String,
    minute: Field,
    hour: Field,
    day: Field,
    month: Field,
    weekday: Field,
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let &[minute, hour, day, month, weekday] = parts.as_slice() else {
            return Err(CronError::FieldCount(parts.len()));
        };
        let mut weekday = Field::parse("weekday", weekday, 0, 7)?;
        if weekday.contains(7) {
            weekday.mask |= 1;
        }
        Ok(CronSchedule {
            source: parts.join(" "),
            minute: Field::parse("minute", minute, 0, 59)?,
            hour: Field::parse("hour", hour, 0, 23)?,
            day: Field::parse("day", day, 1, 31)?,
            month: Field::parse("month", month, 1, 12)?,
            weekday,
        })
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Outcome of one search step in `next_match`.
enum Step {
    Match,
    Next(NaiveDateTime),
    Exhausted,
}

impl CronSchedule {
    pub fn parse(s: &str) -> Result<Self, CronError> {
        s.parse()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the schedule admits the given instant.
    pub fn matches<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        self.matches_local(&at.naive_local())
    }

    /// Whether the schedule admits the given wall-clock time.
    pub fn matches_local(&self, t: &NaiveDateTime) -> bool {
        self.minute.contains(t.minute())
            && self.hour.contains(t.hour())
            && self.day.contains(t.day())
            && self.month.contains(t.month())
            && self.weekday.contains(t.weekday().num_days_from_sunday())
    }

    /// The earliest instant at or after `from` that the schedule admits.
    ///
    /// If `from` already matches it is returned unchanged; otherwise the result
    /// is the start of a minute. The search checks minute, hour, day, month and
    /// weekday in that order; the first failing field is moved to its next
    /// admitted value (or carried into the next coarser unit) and every finer
    /// field is reset to its minimum before checking again from the top.
    ///
    /// Returns `None` when nothing matches within [`MAX_NEXT_MATCH_STEPS`].
    pub fn next_match<Tz: TimeZone>(&self, from: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        if self.matches(from) {
            return Some(from.clone());
        }
        let tz = from.timezone();
        let local = from.naive_local();
        let mut cursor = local.date().and_hms_opt(local.hour(), local.minute(), 0)?;

        for _ in 0..MAX_NEXT_MATCH_STEPS {
            match self.advance(cursor) {
                Step::Match => {
                    // Wall-clock times inside a DST gap do not exist; times in a
                    // repeated hour map twice and only one may lie after `from`.
                    let mapped = tz.from_local_datetime(&cursor);
                    let found = [mapped.clone().earliest(), mapped.latest()]
                        .into_iter()
                        .flatten()
                        .find(|t| t >= from);
                    if found.is_some() {
                        return found;
                    }
                    cursor = next_minute(cursor)?;
                }
                Step::Next(next) => cursor = next,
                Step::Exhausted => return None,
            }
        }
        None
    }

    fn advance(&self, t: NaiveDateTime) -> Step {
        let date = t.date();
        let next = if !self.minute.contains(t.minute()) {
            match self.minute.next_from(t.minute(), 59) {
                Some(m) => date.and_hms_opt(t.hour(), m, 0),
                None => start_of_next_hour(t),
            }
        } else if !self.hour.contains(t.hour()) {
            match self.hour.next_from(t.hour(), 23) {
                Some(h) => date.and_hms_opt(h, 0, 0),
                None => start_of_next_day(date),
            }
        } else if !self.day.contains(t.day()) {
            match self.day.next_from(t.day(), days_in_month(date)) {
                Some(d) => date.with_day(d).and_then(|d| d.and_hms_opt(0, 0, 0)),
                None => start_of_next_month(date),
            }
        } else if !self.month.contains(t.month()) {
            let first = match self.month.next_from(t.month(), 12) {
                Some(m) => NaiveDate::from_ymd_opt(date.year(), m, 1),
                None => NaiveDate::from_ymd_opt(date.year() + 1, 1, 1),
            };
            first.and_then(|d| d.and_hms_opt(0, 0, 0))
        } else if !self.weekday.contains(date.weekday().num_days_from_sunday()) {
            start_of_next_day(date)
        } else {
            return Step::Match;
        };
        next.map_or(Step::Exhausted, Step::Next)
    }
}

fn next_minute(t: NaiveDateTime) -> Option<NaiveDateTime> {
    if t.minute() < 59 {
        t.date().and_hms_opt(t.hour(), t.minute() + 1, 0)
    } else {
        start_of_next_hour(t)
    }
}

fn start_of_next_hour(t: NaiveDateTime) -> Option<NaiveDateTime> {
    if t.hour() < 23 {
        t.date().and_hms_opt(t.hour() + 1, 0, 0)
    } else {
        start_of_next_day(t.date())
    }
}

fn start_of_next_day(date: NaiveDate) -> Option<NaiveDateTime> {
    date.succ_opt()?.and_hms_opt(0, 0, 0)
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

fn start_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    first_of_next_month(date)?.and_hms_opt(0, 0, 0)
}

fn days_in_month(date: NaiveDate) -> u32 {
    first_of_next_month(date)
        .and_then(|d| d.pred_opt())
        .map_or(31, |d| d.day())
}

/// Whether `schedule` admits `at`. Malformed schedules never match.
pub fn matches<Tz: TimeZone>(schedule: &str, at: &DateTime<Tz>) -> bool {
    CronSchedule::parse(schedule).is_ok_and(|s| s.matches(at))
}

/// The next instant at or after `from` admitted by `schedule`, or `None` for a
/// malformed or unsatisfiable schedule.
pub fn next_match<Tz: TimeZone>(schedule: &str, from: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    CronSchedule::parse(schedule).ok()?.next_match(from)
}
