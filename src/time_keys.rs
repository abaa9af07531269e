use crate::error::{EngineError, EngineResult};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeKeyFormat {
    Date,
    DateTime,
}

impl TimeKeyFormat {
    pub fn of(key: &str) -> EngineResult<Self> {
        if key.contains(' ') {
            NaiveDateTime::parse_from_str(key, DATETIME_FORMAT)
                .map(|_| TimeKeyFormat::DateTime)
                .map_err(|_| EngineError::InvalidTimeKey(key.to_string()))
        } else {
            NaiveDate::parse_from_str(key, DATE_FORMAT)
                .map(|_| TimeKeyFormat::Date)
                .map_err(|_| EngineError::InvalidTimeKey(key.to_string()))
        }
    }
}

/// Parses a daily (`YYYY-MM-DD`, midnight) or intraday time key.
pub fn parse_time_key(key: &str) -> EngineResult<NaiveDateTime> {
    match TimeKeyFormat::of(key)? {
        TimeKeyFormat::Date => NaiveDate::parse_from_str(key, DATE_FORMAT)
            .map(|date| date.and_time(NaiveTime::MIN))
            .map_err(|_| EngineError::InvalidTimeKey(key.to_string())),
        TimeKeyFormat::DateTime => NaiveDateTime::parse_from_str(key, DATETIME_FORMAT)
            .map_err(|_| EngineError::InvalidTimeKey(key.to_string())),
    }
}

/// Calendar-date component of a key (`"2020-01-02 09:30:00"` → `"2020-01-02"`).
pub fn calendar_date(key: &str) -> &str {
    key.split_once(' ').map(|(date, _)| date).unwrap_or(key)
}

/// Time-of-day component, absent for daily keys.
pub fn time_of_day(key: &str) -> Option<&str> {
    key.split_once(' ').map(|(_, time)| time.trim())
}

pub fn elapsed(from: &str, to: &str) -> EngineResult<Duration> {
    Ok(parse_time_key(to)? - parse_time_key(from)?)
}

/// Checks that every key parses and all keys share one format.
pub fn validate_keys<'a, I>(keys: I) -> EngineResult<Option<TimeKeyFormat>>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut format = None;
    for key in keys {
        let current = TimeKeyFormat::of(key)?;
        match format {
            None => format = Some(current),
            Some(existing) if existing != current => {
                return Err(EngineError::Snapshot(format!(
                    "time key '{}' does not match the format of earlier keys",
                    key
                )));
            }
            Some(_) => {}
        }
    }
    Ok(format)
}
