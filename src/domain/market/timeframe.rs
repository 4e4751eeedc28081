use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MINUTE_MS: i64 = 60_000;
pub const DAY_MS: i64 = 1_440 * MINUTE_MS;

/// Candle bucket width, expressed in whole minutes.
///
/// Canonical string forms are `"{n}m"`, `"{n}h"` when the width is a whole
/// number of hours, and `"{n}d"` for whole days (`75m`, `2h`, `1d`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe(u32);

impl Timeframe {
    pub const ONE_MIN: Timeframe = Timeframe(1);
    pub const FIVE_MIN: Timeframe = Timeframe(5);
    pub const FIFTEEN_MIN: Timeframe = Timeframe(15);
    pub const THIRTY_MIN: Timeframe = Timeframe(30);
    pub const ONE_HOUR: Timeframe = Timeframe(60);
    pub const FOUR_HOUR: Timeframe = Timeframe(240);
    pub const ONE_DAY: Timeframe = Timeframe(1_440);

    /// Builds a timeframe of `minutes` width. Zero is rejected.
    pub fn from_minutes(minutes: u32) -> Result<Self> {
        if minutes == 0 {
            return Err(anyhow!("Timeframe width must be at least one minute"));
        }
        Ok(Timeframe(minutes))
    }

    /// Returns the duration of this timeframe in minutes
    pub fn to_minutes(&self) -> u32 {
        self.0
    }

    /// Returns the duration in milliseconds
    pub fn to_millis(&self) -> i64 {
        self.0 as i64 * MINUTE_MS
    }

    pub fn is_daily_or_longer(&self) -> bool {
        self.to_millis() >= DAY_MS
    }

    /// Whether candles of `self` can be assembled from whole candles of `base`.
    pub fn is_multiple_of(&self, base: Timeframe) -> bool {
        self.0 % base.0 == 0
    }

    /// Start (ms) of the epoch-aligned period containing `timestamp_ms`,
    /// shifted by `utc_offset_ms` so that daily periods begin at local midnight.
    pub fn period_start(&self, timestamp_ms: i64, utc_offset_ms: i64) -> i64 {
        let local = timestamp_ms + utc_offset_ms;
        local - local.rem_euclid(self.to_millis()) - utc_offset_ms
    }

    /// Checks if a timestamp aligns with the start of this timeframe period
    pub fn is_period_start(&self, timestamp_ms: i64, utc_offset_ms: i64) -> bool {
        self.period_start(timestamp_ms, utc_offset_ms) == timestamp_ms
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_lowercase();
        let split = lowered
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(lowered.len());
        let (digits, unit) = lowered.split_at(split);

        let count: u32 = digits
            .parse()
            .map_err(|_| anyhow!("Invalid timeframe: '{}'. Expected forms like 1m, 75m, 2h, 1d", s))?;

        let minutes = match unit {
            "" | "m" | "min" | "mins" | "minute" | "minutes" => Some(count),
            "h" | "hr" | "hour" | "hours" => count.checked_mul(60),
            "d" | "day" | "days" => count.checked_mul(1_440),
            _ => None,
        }
        .ok_or_else(|| anyhow!("Invalid timeframe: '{}'. Expected forms like 1m, 75m, 2h, 1d", s))?;

        Timeframe::from_minutes(minutes)
    }
}

impl TryFrom<String> for Timeframe {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        if m % 1_440 == 0 {
            write!(f, "{}d", m / 1_440)
        } else if m % 60 == 0 {
            write!(f, "{}h", m / 60)
        } else {
            write!(f, "{}m", m)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_minutes() {
        assert_eq!(Timeframe::ONE_MIN.to_minutes(), 1);
        assert_eq!(Timeframe::FIVE_MIN.to_minutes(), 5);
        assert_eq!(Timeframe::FIFTEEN_MIN.to_minutes(), 15);
        assert_eq!(Timeframe::ONE_HOUR.to_minutes(), 60);
        assert_eq!(Timeframe::FOUR_HOUR.to_minutes(), 240);
        assert_eq!(Timeframe::ONE_DAY.to_minutes(), 1440);
    }

    #[test]
    fn test_from_str() {
        assert_eq!(Timeframe::from_str("1m").unwrap(), Timeframe::ONE_MIN);
        assert_eq!(Timeframe::from_str("1Min").unwrap(), Timeframe::ONE_MIN);
        assert_eq!(Timeframe::from_str("75m").unwrap().to_minutes(), 75);
        assert_eq!(Timeframe::from_str("2h").unwrap().to_minutes(), 120);
        assert_eq!(Timeframe::from_str("4Hour").unwrap(), Timeframe::FOUR_HOUR);
        assert_eq!(Timeframe::from_str("1d").unwrap(), Timeframe::ONE_DAY);
        assert!(Timeframe::from_str("0m").is_err());
        assert!(Timeframe::from_str("invalid").is_err());
        assert!(Timeframe::from_str("5w").is_err());
    }

    #[test]
    fn test_display_is_canonical() {
        assert_eq!(Timeframe::ONE_MIN.to_string(), "1m");
        assert_eq!(Timeframe::from_minutes(75).unwrap().to_string(), "75m");
        assert_eq!(Timeframe::from_minutes(120).unwrap().to_string(), "2h");
        assert_eq!(Timeframe::ONE_DAY.to_string(), "1d");
        assert_eq!("60m".parse::<Timeframe>().unwrap().to_string(), "1h");
    }

    #[test]
    fn test_period_start() {
        let tf = Timeframe::FIVE_MIN;
        // 2024-01-01 00:00:00 UTC
        let base = 1704067200000i64;

        assert_eq!(tf.period_start(base, 0), base);
        assert_eq!(tf.period_start(base + 3 * MINUTE_MS, 0), base);
        assert_eq!(tf.period_start(base + 5 * MINUTE_MS, 0), base + 5 * MINUTE_MS);
        assert_eq!(tf.period_start(base + 7 * MINUTE_MS, 0), base + 5 * MINUTE_MS);
    }

    #[test]
    fn test_daily_period_respects_offset() {
        // UTC+05:30: local midnight is 18:30 UTC of the previous day
        let offset = 330 * MINUTE_MS;
        let base = 1704067200000i64; // 2024-01-01 00:00 UTC = 05:30 local
        let start = Timeframe::ONE_DAY.period_start(base, offset);
        assert_eq!(start, base - offset);
        assert!(Timeframe::ONE_DAY.is_period_start(start, offset));
        assert!(!Timeframe::ONE_DAY.is_period_start(base, offset));
    }

    #[test]
    fn test_serde_uses_string_form() {
        let json = serde_json::to_string(&Timeframe::FIFTEEN_MIN).unwrap();
        assert_eq!(json, "\"15m\"");
        let back: Timeframe = serde_json::from_str("\"4h\"").unwrap();
        assert_eq!(back, Timeframe::FOUR_HOUR);
    }
}
