//! Local-calendar arithmetic shared by the splitter, the reminder scheduler and
//! section bucketing.
//!
//! Everything that talks about "days" or "time of day" works on the
//! participant's local calendar, so a session scheduled at 10:00 stays at
//! 10:00 when it is copied onto the following day.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone};

pub type Timestamp = DateTime<Local>;

/// Resolve a wall-clock time to a local timestamp.
///
/// Ambiguous times (clocks going back) resolve to the earlier instant. Times
/// that fall into a gap (clocks going forward) move one hour later.
pub fn resolve_local(naive: NaiveDateTime) -> Timestamp {
    if let Some(ts) = Local.from_local_datetime(&naive).earliest() {
        return ts;
    }
    let shifted = naive + TimeDelta::hours(1);
    Local
        .from_local_datetime(&shifted)
        .earliest()
        .unwrap_or_else(|| Local.from_utc_datetime(&naive))
}

/// Combine a calendar date with a wall-clock time
pub fn combine(date: NaiveDate, time: NaiveTime) -> Timestamp {
    resolve_local(date.and_time(time))
}

pub fn start_of_day(ts: &Timestamp) -> Timestamp {
    combine(ts.date_naive(), NaiveTime::MIN)
}

pub fn start_of_tomorrow(now: &Timestamp) -> Timestamp {
    add_days(&start_of_day(now), 1)
}

/// Move a timestamp by whole calendar days, keeping its time of day.
///
/// Returns `None` when the result falls outside chrono's date range.
pub fn checked_add_days(ts: &Timestamp, days: i64) -> Option<Timestamp> {
    let delta = TimeDelta::try_days(days)?;
    ts.date_naive()
        .checked_add_signed(delta)
        .map(|date| combine(date, ts.time()))
}

/// Like [`checked_add_days`], leaving `ts` unchanged when out of range.
pub fn add_days(ts: &Timestamp, days: i64) -> Timestamp {
    checked_add_days(ts, days).unwrap_or(*ts)
}

/// Move a timestamp by an absolute number of hours
pub fn checked_add_hours(ts: &Timestamp, hours: i64) -> Option<Timestamp> {
    ts.checked_add_signed(TimeDelta::try_hours(hours)?)
}

/// The given date at `hour:00` local time
pub fn at_hour(date: NaiveDate, hour: u32) -> Timestamp {
    let time = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    combine(date, time)
}

/// Keep the date of `date_src` and the time of day of `time_src`.
pub fn with_time_of(date_src: &Timestamp, time_src: &Timestamp) -> Timestamp {
    combine(date_src.date_naive(), time_src.time())
}

/// Inverse of `DateTime::timestamp_millis`, the unit the store persists.
pub fn from_unix_millis(millis: i64) -> Option<Timestamp> {
    Local.timestamp_millis_opt(millis).single()
}

pub fn is_same_day(a: &Timestamp, b: &Timestamp) -> bool {
    a.date_naive() == b.date_naive()
}

pub fn format_date(ts: &Timestamp) -> String {
    ts.format("%b %-d, %Y").to_string()
}

pub fn format_time(ts: &Timestamp) -> String {
    ts.format("%-I:%M %p").to_string().to_lowercase()
}

pub fn format_date_time(ts: &Timestamp) -> String {
    format!("{} {}", ts.format("%-m/%-d/%y"), format_time(ts))
}
