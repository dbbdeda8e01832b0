//! Date and timestamp conversions.
//!
//! PostgreSQL counts dates in days and timestamps in microseconds from
//! 2000-01-01 00:00:00 UTC. SciDB `datetime` is whole seconds since the Unix
//! epoch.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::error::FieldError;

/// Difference between the Unix and PostgreSQL epochs, in microseconds.
pub const PG_EPOCH_OFFSET_USEC: i64 = 946_684_800_000_000;

fn pg_epoch_date() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(2000, 1, 1)
}

fn out_of_range(value: impl ToString) -> FieldError {
    FieldError::OutOfRange {
        value: value.to_string(),
        target: "datetime",
    }
}

/// Microseconds since 2000-01-01 to a UTC instant.
pub fn timestamp_to_datetime(usec: i64) -> Result<DateTime<Utc>, FieldError> {
    // i64::MIN and i64::MAX encode -infinity and infinity.
    if usec == i64::MIN || usec == i64::MAX {
        return Err(out_of_range(if usec > 0 { "infinity" } else { "-infinity" }));
    }
    usec.checked_add(PG_EPOCH_OFFSET_USEC)
        .and_then(DateTime::from_timestamp_micros)
        .ok_or_else(|| out_of_range(usec))
}

/// Microseconds since 2000-01-01 to whole Unix seconds, rounding toward the past.
pub fn timestamp_to_unix_secs(usec: i64) -> Result<i64, FieldError> {
    Ok(timestamp_to_datetime(usec)?.timestamp())
}

/// Days since 2000-01-01 to the Unix seconds of that day's midnight (UTC).
pub fn date_to_unix_secs(days: i32) -> Result<i64, FieldError> {
    if days == i32::MIN || days == i32::MAX {
        return Err(out_of_range(if days > 0 { "infinity" } else { "-infinity" }));
    }
    pg_epoch_date()
        .and_then(|epoch| epoch.checked_add_signed(Duration::days(days as i64)))
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc().timestamp())
        .ok_or_else(|| out_of_range(days))
}
