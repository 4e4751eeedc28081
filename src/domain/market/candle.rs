use crate::domain::errors::InputError;
use crate::domain::market::bucketing::{Bucket, BucketClock};
use crate::domain::market::timeframe::Timeframe;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// OHLCV aggregate for one `[bucket_start, bucket_end)` interval.
///
/// `closed == false` marks the candle still being formed; once closed a
/// candle is never modified again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bucket_start: i64,
    pub bucket_end: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
    pub closed: bool,
}

impl Candle {
    /// Opens a forming candle from its first price observation.
    pub fn opening(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        bucket: Bucket,
        price: Decimal,
        volume: u64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            bucket_start: bucket.start,
            bucket_end: bucket.end,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
            closed: false,
        }
    }

    /// Starts a coarser candle from a closed finer one.
    pub fn resampled_from(base: &Candle, timeframe: Timeframe, bucket: Bucket) -> Self {
        Self {
            symbol: base.symbol.clone(),
            timeframe,
            bucket_start: bucket.start,
            bucket_end: bucket.end,
            open: base.open,
            high: base.high,
            low: base.low,
            close: base.close,
            volume: base.volume,
            closed: false,
        }
    }

    /// Merges a later finer candle into this one.
    ///
    /// - Open remains unchanged (first candle's open)
    /// - High/low widen
    /// - Close becomes the latest close
    /// - Volume is summed
    pub fn absorb(&mut self, later: &Candle) {
        if later.high > self.high {
            self.high = later.high;
        }
        if later.low < self.low {
            self.low = later.low;
        }
        self.close = later.close;
        self.volume = self.volume.saturating_add(later.volume);
    }

    pub fn bucket(&self) -> Bucket {
        Bucket {
            start: self.bucket_start,
            end: self.bucket_end,
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }

    /// Frozen copy of this candle.
    pub fn into_closed(mut self) -> Self {
        self.closed = true;
        self
    }

    pub fn identity_key(&self) -> String {
        format!(
            "candle:{}:{}:{}",
            self.symbol, self.timeframe, self.bucket_start
        )
    }
}

/// Pre-aggregated historical bar used for backfill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalBar {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bucket_start: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

impl HistoricalBar {
    /// Validates the bar and converts it into a closed candle.
    ///
    /// The bar must start exactly on a bucket boundary of its timeframe.
    pub fn into_candle(self, clock: &BucketClock) -> Result<Candle, InputError> {
        let invalid = |reason: String| InputError::InvalidBar {
            symbol: self.symbol.clone(),
            bucket_start: self.bucket_start,
            reason,
        };

        if self.symbol.trim().is_empty() {
            return Err(InputError::EmptySymbol);
        }
        for price in [self.open, self.high, self.low, self.close] {
            if price <= Decimal::ZERO {
                return Err(InputError::NonPositivePrice {
                    symbol: self.symbol.clone(),
                    price,
                });
            }
        }
        if self.volume < 0 {
            return Err(InputError::NegativeVolume {
                symbol: self.symbol.clone(),
                volume: self.volume,
            });
        }
        if self.low > self.high
            || self.open > self.high
            || self.open < self.low
            || self.close > self.high
            || self.close < self.low
        {
            return Err(invalid(format!(
                "inconsistent OHLC O:{} H:{} L:{} C:{}",
                self.open, self.high, self.low, self.close
            )));
        }

        let bucket = clock.bucket(&self.symbol, self.bucket_start, self.timeframe)?;
        if bucket.start != self.bucket_start {
            return Err(invalid(format!(
                "not aligned to {} bucket starting at {}",
                self.timeframe, bucket.start
            )));
        }

        Ok(Candle {
            symbol: self.symbol,
            timeframe: self.timeframe,
            bucket_start: bucket.start,
            bucket_end: bucket.end,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume as u64,
            closed: true,
        })
    }
}
