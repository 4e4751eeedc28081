use crate::domain::errors::StateInconsistencyError;
use crate::domain::market::candle::Candle;
use crate::domain::market::timeframe::Timeframe;
use std::collections::VecDeque;

/// Bounded, time-ordered window of closed candles for one (symbol, timeframe).
///
/// Candles keep the absolute index they were appended with, so pivot and
/// pattern positions stay stable while old candles are evicted.
#[derive(Debug)]
pub struct CandleSeries {
    symbol: String,
    timeframe: Timeframe,
    capacity: usize,
    candles: VecDeque<Candle>,
    /// Absolute index of `candles[0]`
    first_index: u64,
}

impl CandleSeries {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, capacity: usize) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            capacity: capacity.max(1),
            candles: VecDeque::with_capacity(capacity.clamp(1, 4_096)),
            first_index: 0,
        }
    }

    /// Appends a closed candle and returns its absolute index.
    pub fn push(&mut self, candle: Candle) -> Result<u64, StateInconsistencyError> {
        if let Some(last) = self.candles.back()
            && candle.bucket_start < last.bucket_end
        {
            return Err(StateInconsistencyError::SeriesOrder {
                symbol: self.symbol.clone(),
                timeframe: self.timeframe.to_string(),
                bucket_start: candle.bucket_start,
                last_start: last.bucket_start,
            });
        }

        let index = self.next_index();
        self.candles.push_back(candle);
        if self.candles.len() > self.capacity {
            self.candles.pop_front();
            self.first_index += 1;
        }
        Ok(index)
    }

    pub fn get(&self, index: u64) -> Option<&Candle> {
        let offset = index.checked_sub(self.first_index)?;
        self.candles.get(usize::try_from(offset).ok()?)
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    /// Absolute index the next pushed candle will receive.
    pub fn next_index(&self) -> u64 {
        self.first_index + self.candles.len() as u64
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Candles with absolute index in `[from, to]` that are still retained.
    pub fn range(&self, from: u64, to: u64) -> impl Iterator<Item = &Candle> {
        let start = from.max(self.first_index);
        (start..=to).map_while(move |i| self.get(i))
    }

    /// Bucket end of the newest candle.
    pub fn watermark(&self) -> Option<i64> {
        self.last().map(|c| c.bucket_end)
    }
}
