//! When backup cycles fire.
//!
//! All computations take the current wall-clock reading as an argument so the
//! scheduler can recompute the next trigger from scratch after a restart.
//! Intervals are measured on the UTC timeline; the local zone only places
//! daily triggers.

use std::time::Duration;

use chrono::{DateTime, LocalResult, NaiveDateTime, NaiveTime, Offset, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::validation::ValidationError;

/// Longest accepted interval.
pub const MAX_INTERVAL_MINUTES: u64 = 366 * 24 * 60;

/// What an interval is measured from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntervalAnchor {
    /// Next trigger is `previous start + interval`; an overrun starts the
    /// next cycle as soon as the previous one returns.
    #[default]
    Start,
    /// Next trigger is `previous end + interval`.
    End,
}

impl std::str::FromStr for IntervalAnchor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(IntervalAnchor::Start),
            "end" => Ok(IntervalAnchor::End),
            other => Err(format!("unknown interval anchor '{other}' (expected start or end)")),
        }
    }
}

/// Exactly one trigger rule; read once at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// Once per day at a local time-of-day.
    Daily { at: NaiveTime },
    /// Repeating interval.
    Interval {
        every: Duration,
        #[serde(default)]
        anchor: IntervalAnchor,
    },
}

/// Bounds of the most recent cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ScheduleSpec {
    /// Build from the two mutually exclusive configuration options.
    pub fn from_options(
        backup_time: Option<&str>,
        interval_minutes: Option<u64>,
        anchor: IntervalAnchor,
    ) -> Result<Self, ValidationError> {
        match (backup_time, interval_minutes) {
            (Some(_), Some(_)) => Err(ValidationError::ConflictingSchedule),
            (None, None) => Err(ValidationError::MissingSchedule),
            (Some(t), None) => Ok(ScheduleSpec::Daily {
                at: parse_time_of_day(t)?,
            }),
            (None, Some(0)) => Err(ValidationError::ZeroInterval),
            (None, Some(m)) if m > MAX_INTERVAL_MINUTES => Err(ValidationError::IntervalTooLarge(m)),
            (None, Some(m)) => Ok(ScheduleSpec::Interval {
                every: Duration::from_secs(m * 60),
                anchor,
            }),
        }
    }

    /// Next instant a cycle should start, given `now` and the previous run.
    ///
    /// `now` carries the local zone a daily time-of-day is read in. The
    /// result may lie in the past only when a cycle overran; callers start
    /// immediately in that case.
    pub fn next_trigger<Tz: TimeZone>(&self, now: &DateTime<Tz>, last: Option<LastRun>) -> DateTime<Utc> {
        match *self {
            ScheduleSpec::Daily { at } => {
                let zone = now.timezone();
                let day = now.date_naive();
                let today = resolve_local(&zone, day.and_time(at));
                let already_ran = last.is_some_and(|r| r.started_at >= today);
                if today >= now.to_utc() && !already_ran {
                    today
                } else {
                    resolve_local(&zone, (day + TimeDelta::days(1)).and_time(at))
                }
            }
            ScheduleSpec::Interval { every, anchor } => {
                let every = to_delta(every);
                match (last, anchor) {
                    (None, _) => saturating_add(now.to_utc(), every),
                    (Some(r), IntervalAnchor::Start) => saturating_add(r.started_at, every).max(r.finished_at),
                    (Some(r), IntervalAnchor::End) => saturating_add(r.finished_at, every),
                }
            }
        }
    }

    /// How long the process may go without finishing a cycle before it is
    /// considered stalled: 25h for daily schedules, twice the interval otherwise.
    pub fn stale_after(&self) -> Duration {
        match self {
            ScheduleSpec::Daily { .. } => Duration::from_secs(25 * 60 * 60),
            ScheduleSpec::Interval { every, .. } => every.saturating_mul(2),
        }
    }
}

/// Time to sleep from `now` until `trigger`; zero when the trigger has passed.
pub fn delay_until(now: DateTime<Utc>, trigger: DateTime<Utc>) -> Duration {
    (trigger - now).to_std().unwrap_or(Duration::ZERO)
}

/// Accepts `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, ValidationError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| ValidationError::BadTimeOfDay(s.to_string()))
}

/// Map a local wall-clock reading to an instant. A repeated reading takes
/// its first occurrence; a skipped one keeps the offset from before the gap,
/// so it lands just after the shift.
fn resolve_local<Tz: TimeZone>(zone: &Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match zone.from_local_datetime(&local) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t.to_utc(),
        LocalResult::None => {
            let before = zone.offset_from_utc_datetime(&(local - TimeDelta::days(1))).fix();
            (local - TimeDelta::seconds(before.local_minus_utc().into())).and_utc()
        }
    }
}

fn saturating_add(t: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    t.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or_else(|_| TimeDelta::days(36_500))
}
