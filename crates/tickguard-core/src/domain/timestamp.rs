//! Instants carried in health records and normalized market rows.
//!
//! Providers send trading days (`2024-03-15`, `20240315`), bar times
//! (`2024-03-15 09:31`) or full RFC3339 strings. All of them end up as one
//! UTC instant so records from different providers compare and serialize
//! the same way.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcDateTime(OffsetDateTime);

impl UtcDateTime {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Parses RFC3339 with any offset and shifts it to UTC.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        OffsetDateTime::parse(input.trim(), &Rfc3339)
            .map(|parsed| Self(parsed.to_offset(UtcOffset::UTC)))
            .map_err(|_| ValidationError::InvalidTimestamp {
                value: input.to_owned(),
            })
    }

    /// Reads a provider day (`YYYY-MM-DD` or `YYYYMMDD`) with an optional
    /// ` HH:MM[:SS]` bar time. Provider-local clock values are kept as-is.
    pub fn parse_trading_day(input: &str) -> Option<Self> {
        let (day, clock) = match input.trim().split_once(' ') {
            Some((day, clock)) => (day, Some(clock)),
            None => (input.trim(), None),
        };

        let date = parse_day(day)?;
        let time = clock.map_or(Some(Time::MIDNIGHT), parse_clock)?;
        Some(Self(PrimitiveDateTime::new(date, time).assume_utc()))
    }

    /// The instant `window` earlier, or `None` if it falls off the calendar.
    pub fn checked_sub(self, window: Duration) -> Option<Self> {
        let window = time::Duration::try_from(window).ok()?;
        self.0.checked_sub(window).map(Self)
    }

    pub fn format_rfc3339(self) -> String {
        self.0
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.0.unix_timestamp().to_string())
    }
}

fn parse_day(day: &str) -> Option<Date> {
    let digits = day.replace('-', "");
    if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let year = digits[..4].parse::<i32>().ok()?;
    let month = Month::try_from(digits[4..6].parse::<u8>().ok()?).ok()?;
    let day = digits[6..].parse::<u8>().ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

fn parse_clock(clock: &str) -> Option<Time> {
    let mut fields = clock.trim().splitn(3, ':').map(str::parse::<u8>);
    let hour = fields.next()?.ok()?;
    let minute = fields.next()?.ok()?;
    let second = fields.next().transpose().ok()?.unwrap_or(0);
    Time::from_hms(hour, minute, second).ok()
}

impl Display for UtcDateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format_rfc3339())
    }
}

impl Serialize for UtcDateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UtcDateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(D::Error::custom)
    }
}
