//! Supported aggregation intervals (§3, §4.3).

use crate::error::CoreError;
use std::fmt;
use std::str::FromStr;

/// A symbolic duration from the supported set. `OneMinute` is the storage
/// granularity; every other variant is computed by aggregation, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    TwoHours,
    FourHours,
    SixHours,
    TwelveHours,
    OneDay,
    OneWeek,
}

impl Interval {
    pub fn as_minutes(self) -> i64 {
        match self {
            Interval::OneMinute => 1,
            Interval::FiveMinutes => 5,
            Interval::FifteenMinutes => 15,
            Interval::ThirtyMinutes => 30,
            Interval::OneHour => 60,
            Interval::TwoHours => 120,
            Interval::FourHours => 240,
            Interval::SixHours => 360,
            Interval::TwelveHours => 720,
            Interval::OneDay => 1_440,
            Interval::OneWeek => 10_080,
        }
    }

    pub fn as_millis(self) -> i64 {
        self.as_minutes() * 60_000
    }

    /// Canonical spelling used in responses and as the stored `interval` tag.
    pub fn canonical(self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
            Interval::TwoHours => "2h",
            Interval::FourHours => "4h",
            Interval::SixHours => "6h",
            Interval::TwelveHours => "12h",
            Interval::OneDay => "1d",
            Interval::OneWeek => "1w",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl FromStr for Interval {
    type Err = CoreError;

    /// Accepts the canonical spellings plus the alternate unit spellings
    /// named in §4.3 (`m`/`min`, `h`/`hour`, `d`/`day`, `w`/`week`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .to_lowercase()
            .replace("min", "m")
            .replace("hour", "h")
            .replace("day", "d")
            .replace("week", "w");

        match normalized.as_str() {
            "1m" => Ok(Interval::OneMinute),
            "5m" => Ok(Interval::FiveMinutes),
            "15m" => Ok(Interval::FifteenMinutes),
            "30m" => Ok(Interval::ThirtyMinutes),
            "1h" => Ok(Interval::OneHour),
            "2h" => Ok(Interval::TwoHours),
            "4h" => Ok(Interval::FourHours),
            "6h" => Ok(Interval::SixHours),
            "12h" => Ok(Interval::TwelveHours),
            "1d" => Ok(Interval::OneDay),
            "1w" => Ok(Interval::OneWeek),
            _ => Err(CoreError::Validation(format!("unsupported interval '{s}'"))),
        }
    }
}
