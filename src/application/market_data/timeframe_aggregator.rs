use crate::domain::errors::InputError;
use crate::domain::market::bucketing::BucketClock;
use crate::domain::market::candle::Candle;
use crate::domain::market::timeframe::Timeframe;
use std::collections::HashMap;
use tracing::warn;

/// Aggregates closed base candles into higher timeframes
///
/// This service maintains state for each symbol and timeframe combination,
/// accumulating base candles until a higher-timeframe bucket is complete.
/// A coarse candle closes as soon as a base candle reaching its bucket end
/// has been absorbed, or when a base candle of a later bucket arrives.
pub struct TimeframeAggregator {
    clock: BucketClock,
    /// Target timeframes, ascending, excluding the base
    timeframes: Vec<Timeframe>,
    /// Key: (symbol, timeframe), Value: forming candle
    active_candles: HashMap<(String, Timeframe), Candle>,
}

impl TimeframeAggregator {
    pub fn new(clock: BucketClock, base: Timeframe, timeframes: &[Timeframe]) -> Self {
        let mut targets: Vec<Timeframe> = timeframes
            .iter()
            .copied()
            .filter(|tf| *tf != base)
            .collect();
        targets.sort();
        targets.dedup();

        Self {
            clock,
            timeframes: targets,
            active_candles: HashMap::new(),
        }
    }

    pub fn timeframes(&self) -> &[Timeframe] {
        &self.timeframes
    }

    /// Process a closed base candle and return the higher timeframe candles it closed,
    /// in ascending timeframe order.
    pub fn process_candle(&mut self, candle: &Candle) -> Result<Vec<Candle>, InputError> {
        let mut completed_candles = Vec::new();

        for &timeframe in &self.timeframes {
            let key = (candle.symbol.clone(), timeframe);
            let bucket = self
                .clock
                .bucket(&candle.symbol, candle.bucket_start, timeframe)?;

            match self.active_candles.get_mut(&key) {
                Some(active) if active.bucket_start == bucket.start => {
                    active.absorb(candle);
                }
                Some(active) if active.bucket_start > bucket.start => {
                    warn!(
                        "TimeframeAggregator: {} {} base candle {} predates forming bucket {}, skipped",
                        candle.symbol, timeframe, candle.bucket_start, active.bucket_start
                    );
                    continue;
                }
                Some(_) => {
                    // New period started: the old one is complete
                    if let Some(previous) = self.active_candles.remove(&key) {
                        completed_candles.push(previous.into_closed());
                    }
                    self.active_candles
                        .insert(key.clone(), Candle::resampled_from(candle, timeframe, bucket));
                }
                None => {
                    self.active_candles
                        .insert(key.clone(), Candle::resampled_from(candle, timeframe, bucket));
                }
            }

            if candle.bucket_end >= bucket.end
                && let Some(done) = self.active_candles.remove(&key)
            {
                completed_candles.push(done.into_closed());
            }
        }

        Ok(completed_candles)
    }

    /// Manually complete all active candles (end of session, removal, shutdown)
    ///
    /// # Arguments
    /// * `symbol` - Optional symbol filter (if None, completes all symbols)
    pub fn flush(&mut self, symbol: Option<&str>) -> Vec<Candle> {
        let keys: Vec<_> = self
            .active_candles
            .keys()
            .filter(|(s, _)| symbol.is_none_or(|sym| s == sym))
            .cloned()
            .collect();

        let mut flushed: Vec<Candle> = keys
            .into_iter()
            .filter_map(|key| self.active_candles.remove(&key))
            .map(Candle::into_closed)
            .collect();
        flushed.sort_by_key(|c| (c.timeframe, c.bucket_start));
        flushed
    }

    /// Get the current state of an active candle (for debugging/monitoring)
    pub fn get_active_candle(&self, symbol: &str, timeframe: Timeframe) -> Option<&Candle> {
        self.active_candles.get(&(symbol.to_string(), timeframe))
    }

    /// Clear all state
    pub fn clear(&mut self) {
        self.active_candles.clear();
    }
}
