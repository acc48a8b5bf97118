//! Stream periods and their length in seconds.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::error::ValidationError;

/// Unit in which a funding amount is spread.
///
/// The discriminants match the ledger's `StreamPeriod` enumeration, where
/// `0` is "unspecified" and therefore invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Second = 1,
    Minute = 2,
    Hour = 3,
    Day = 4,
    Week = 5,
    /// 365/12 days
    Month = 6,
    Year = 7,
}

impl Period {
    /// All valid periods, shortest first.
    pub const ALL: [Period; 7] = [
        Period::Second,
        Period::Minute,
        Period::Hour,
        Period::Day,
        Period::Week,
        Period::Month,
        Period::Year,
    ];

    /// Length of one period in seconds.
    pub const fn seconds(self) -> u64 {
        match self {
            Period::Second => 1,
            Period::Minute => 60,
            Period::Hour => 3_600,
            Period::Day => 86_400,
            Period::Week => 604_800,
            Period::Month => 2_628_000,
            Period::Year => 31_536_000,
        }
    }

    /// Ledger enumeration value.
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Lower-case name.
    pub const fn name(self) -> &'static str {
        match self {
            Period::Second => "second",
            Period::Minute => "minute",
            Period::Hour => "hour",
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
        }
    }
}

impl TryFrom<i32> for Period {
    type Error = ValidationError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Period::ALL
            .into_iter()
            .find(|p| p.code() == code)
            .ok_or_else(|| ValidationError::UnknownPeriod(code.to_string()))
    }
}

impl FromStr for Period {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        let name = name.strip_prefix("stream_period_").unwrap_or(&name);
        Period::ALL
            .into_iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| ValidationError::UnknownPeriod(s.to_string()))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_seconds() {
        assert_eq!(Period::Second.seconds(), 1);
        assert_eq!(Period::Minute.seconds(), 60);
        assert_eq!(Period::Hour.seconds(), 3_600);
        assert_eq!(Period::Day.seconds(), 86_400);
        assert_eq!(Period::Week.seconds(), 604_800);
        assert_eq!(Period::Month.seconds(), 365 * 86_400 / 12);
        assert_eq!(Period::Year.seconds(), 365 * 86_400);
    }

    #[test]
    fn test_period_from_code() {
        assert_eq!(Period::try_from(6).unwrap(), Period::Month);
        assert!(matches!(
            Period::try_from(0),
            Err(ValidationError::UnknownPeriod(_))
        ));
        assert!(Period::try_from(8).is_err());
    }

    #[test]
    fn test_period_parse() {
        assert_eq!("month".parse::<Period>().unwrap(), Period::Month);
        assert_eq!("Week".parse::<Period>().unwrap(), Period::Week);
        assert_eq!("STREAM_PERIOD_DAY".parse::<Period>().unwrap(), Period::Day);
        assert!("fortnight".parse::<Period>().is_err());
        assert!("unspecified".parse::<Period>().is_err());
    }
}
