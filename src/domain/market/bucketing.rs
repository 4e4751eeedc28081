//! Pure timestamp → bucket mapping.
//!
//! Buckets are half-open `[start, end)` intervals in epoch milliseconds.
//! Without a session window they are aligned to the epoch (shifted by the
//! configured UTC offset). With a session window, intraday buckets are
//! anchored at the session open and the last bucket of a day is truncated
//! at the session close.

use crate::domain::errors::InputError;
use crate::domain::market::timeframe::{DAY_MS, MINUTE_MS, Timeframe};
use anyhow::{Result, anyhow};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bucket {
    pub start: i64,
    pub end: i64,
}

impl Bucket {
    pub fn contains(&self, timestamp_ms: i64) -> bool {
        timestamp_ms >= self.start && timestamp_ms < self.end
    }

    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }
}

/// Daily trading session in local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    open: NaiveTime,
    close: NaiveTime,
}

impl SessionWindow {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Result<Self> {
        if open >= close {
            return Err(anyhow!(
                "Session open {} must be before session close {}",
                open,
                close
            ));
        }
        Ok(Self { open, close })
    }

    /// Parses `HH:MM` bounds.
    pub fn parse(open: &str, close: &str) -> Result<Self> {
        let open = NaiveTime::parse_from_str(open.trim(), "%H:%M")
            .map_err(|e| anyhow!("Invalid session open '{}': {}", open, e))?;
        let close = NaiveTime::parse_from_str(close.trim(), "%H:%M")
            .map_err(|e| anyhow!("Invalid session close '{}': {}", close, e))?;
        Self::new(open, close)
    }

    pub fn open(&self) -> NaiveTime {
        self.open
    }

    pub fn close(&self) -> NaiveTime {
        self.close
    }

    fn open_offset_ms(&self) -> i64 {
        millis_of_day(self.open)
    }

    fn close_offset_ms(&self) -> i64 {
        millis_of_day(self.close)
    }
}

fn millis_of_day(t: NaiveTime) -> i64 {
    use chrono::Timelike;
    t.num_seconds_from_midnight() as i64 * 1_000
}

/// Maps timestamps to buckets for any timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BucketClock {
    session: Option<SessionWindow>,
    utc_offset_ms: i64,
}

impl BucketClock {
    pub fn new(session: Option<SessionWindow>, utc_offset_minutes: i32) -> Self {
        Self {
            session,
            utc_offset_ms: utc_offset_minutes as i64 * MINUTE_MS,
        }
    }

    /// Plain UTC epoch alignment.
    pub fn utc() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<SessionWindow> {
        self.session
    }

    /// Returns the bucket containing `timestamp_ms`.
    ///
    /// Fails with [`InputError::OutsideSession`] when a session window is
    /// configured and the timestamp falls outside it.
    pub fn bucket(
        &self,
        symbol: &str,
        timestamp_ms: i64,
        timeframe: Timeframe,
    ) -> Result<Bucket, InputError> {
        let width = timeframe.to_millis();

        let Some(session) = self.session else {
            let start = timeframe.period_start(timestamp_ms, self.utc_offset_ms);
            return Ok(Bucket {
                start,
                end: start + width,
            });
        };

        let local = timestamp_ms + self.utc_offset_ms;
        let day_start = local - local.rem_euclid(DAY_MS);
        let ms_of_day = local - day_start;
        let open = session.open_offset_ms();
        let close = session.close_offset_ms();

        if ms_of_day < open || ms_of_day >= close {
            return Err(InputError::OutsideSession {
                symbol: symbol.to_string(),
                timestamp: timestamp_ms,
            });
        }

        // Daily and longer buckets cover one whole session.
        let (start_of_day, end_of_day) = if timeframe.is_daily_or_longer() {
            (open, close)
        } else {
            let k = (ms_of_day - open) / width;
            let start = open + k * width;
            (start, (start + width).min(close))
        };

        Ok(Bucket {
            start: day_start + start_of_day - self.utc_offset_ms,
            end: day_start + end_of_day - self.utc_offset_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts(h: u32, m: u32, s: u32) -> i64 {
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, s)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn test_epoch_aligned_buckets() {
        let clock = BucketClock::utc();
        let b = clock.bucket("X", ts(10, 7, 30), Timeframe::FIVE_MIN).unwrap();
        assert_eq!(b.start, ts(10, 5, 0));
        assert_eq!(b.end, ts(10, 10, 0));
        assert!(b.contains(ts(10, 9, 59)));
        assert!(!b.contains(ts(10, 10, 0)));
    }

    #[test]
    fn test_session_anchored_75m_buckets() {
        let session = SessionWindow::parse("09:15", "15:30").unwrap();
        let clock = BucketClock::new(Some(session), 0);
        let tf = Timeframe::from_minutes(75).unwrap();

        let first = clock.bucket("X", ts(9, 15, 0), tf).unwrap();
        assert_eq!(first.start, ts(9, 15, 0));
        assert_eq!(first.end, ts(10, 30, 0));

        let second = clock.bucket("X", ts(11, 0, 0), tf).unwrap();
        assert_eq!(second.start, ts(10, 30, 0));

        // Last bucket of the day is truncated at the session close.
        let last = clock.bucket("X", ts(15, 20, 0), tf).unwrap();
        assert_eq!(last.start, ts(15, 0, 0));
        assert_eq!(last.end, ts(15, 30, 0));
    }

    #[test]
    fn test_session_rejects_outside_ticks() {
        let session = SessionWindow::parse("09:15", "15:30").unwrap();
        let clock = BucketClock::new(Some(session), 0);

        let err = clock
            .bucket("NIFTY", ts(9, 14, 59), Timeframe::ONE_MIN)
            .unwrap_err();
        assert!(matches!(err, InputError::OutsideSession { .. }));
        assert!(clock.bucket("NIFTY", ts(15, 30, 0), Timeframe::ONE_MIN).is_err());
    }

    #[test]
    fn test_session_daily_bucket_spans_session() {
        let session = SessionWindow::parse("09:15", "15:30").unwrap();
        let clock = BucketClock::new(Some(session), 0);
        let b = clock.bucket("X", ts(12, 0, 0), Timeframe::ONE_DAY).unwrap();
        assert_eq!(b.start, ts(9, 15, 0));
        assert_eq!(b.end, ts(15, 30, 0));
    }

    #[test]
    fn test_session_with_utc_offset() {
        // 09:15-15:30 at UTC+05:30 is 03:45-10:00 UTC
        let session = SessionWindow::parse("09:15", "15:30").unwrap();
        let clock = BucketClock::new(Some(session), 330);
        let b = clock.bucket("X", ts(3, 50, 0), Timeframe::FIFTEEN_MIN).unwrap();
        assert_eq!(b.start, ts(3, 45, 0));
        assert_eq!(b.end, ts(4, 0, 0));
    }

    #[test]
    fn test_invalid_session() {
        assert!(SessionWindow::parse("15:30", "09:15").is_err());
        assert!(SessionWindow::parse("9h", "10:00").is_err());
    }
}
