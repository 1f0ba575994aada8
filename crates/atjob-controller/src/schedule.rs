use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::error::{ControllerError, Result};

/// The only accepted schedule format: an absolute UTC instant to the second.
pub const SCHEDULE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Parse a `YYYY-MM-DDTHH:MM:SSZ` schedule string.
pub fn parse_schedule(schedule: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(schedule, SCHEDULE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|source| ControllerError::InvalidSchedule {
            value: schedule.to_string(),
            source,
        })
}

/// Signed time from `now` until `schedule`; zero or negative once due.
pub fn time_until(schedule: &str, now: DateTime<Utc>) -> Result<Duration> {
    Ok(parse_schedule(schedule)? - now)
}
