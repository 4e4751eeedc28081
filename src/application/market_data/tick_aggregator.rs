use crate::domain::errors::{InputError, OutOfOrderError, PipelineError};
use crate::domain::market::bucketing::BucketClock;
use crate::domain::market::candle::Candle;
use crate::domain::market::tick::Tick;
use crate::domain::market::timeframe::Timeframe;
use tracing::{debug, info};

#[derive(Debug)]
struct CandleBuilder {
    candle: Candle,
    first_ts: i64,
    latest_ts: i64,
    tick_count: u32,
}

impl CandleBuilder {
    fn new(candle: Candle, timestamp: i64) -> Self {
        Self {
            candle,
            first_ts: timestamp,
            latest_ts: timestamp,
            tick_count: 1,
        }
    }

    fn widen(&mut self, tick: &Tick) {
        if tick.price > self.candle.high {
            self.candle.high = tick.price;
        }
        if tick.price < self.candle.low {
            self.candle.low = tick.price;
        }
        self.candle.volume = self.candle.volume.saturating_add(tick.volume);
        self.tick_count += 1;
    }

    /// Folds a tick of the same bucket. Close only moves forward in time,
    /// open only backward.
    fn update(&mut self, tick: &Tick) {
        self.widen(tick);
        if tick.timestamp >= self.latest_ts {
            self.candle.close = tick.price;
            self.latest_ts = tick.timestamp;
        }
        if tick.timestamp < self.first_ts {
            self.candle.open = tick.price;
            self.first_ts = tick.timestamp;
        }
    }
}

/// Builds base-timeframe candles from the ticks of one symbol.
pub struct TickAggregator {
    symbol: String,
    timeframe: Timeframe,
    clock: BucketClock,
    tolerance_ms: i64,
    current: Option<CandleBuilder>,
}

impl TickAggregator {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        clock: BucketClock,
        tolerance_ms: i64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            clock,
            tolerance_ms,
            current: None,
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// The candle being formed, if any.
    pub fn peek(&self) -> Option<&Candle> {
        self.current.as_ref().map(|b| &b.candle)
    }

    pub fn is_forming(&self) -> bool {
        self.current.is_some()
    }

    /// Processes one tick. Returns the previous candle, frozen, when the
    /// tick opens a later bucket.
    ///
    /// Ticks older than the forming bucket's start minus the tolerance are
    /// rejected. Late ticks within the tolerance only widen the forming
    /// candle's high/low and add volume; a closed candle is never reopened.
    pub fn ingest(&mut self, tick: &Tick) -> Result<Option<Candle>, PipelineError> {
        tick.validate()?;
        if tick.symbol != self.symbol {
            return Err(InputError::SymbolMismatch {
                expected: self.symbol.clone(),
                actual: tick.symbol.clone(),
            }
            .into());
        }

        let bucket = self.clock.bucket(&self.symbol, tick.timestamp, self.timeframe)?;

        let Some(builder) = self.current.as_mut() else {
            info!(
                "TickAggregator: {} - First tick @ {}, starting {} aggregation",
                self.symbol, tick.price, self.timeframe
            );
            let candle = Candle::opening(
                self.symbol.clone(),
                self.timeframe,
                bucket,
                tick.price,
                tick.volume,
            );
            self.current = Some(CandleBuilder::new(candle, tick.timestamp));
            return Ok(None);
        };

        let forming_start = builder.candle.bucket_start;

        if bucket.start == forming_start {
            builder.update(tick);
            return Ok(None);
        }

        if bucket.start < forming_start {
            if tick.timestamp < forming_start - self.tolerance_ms {
                return Err(OutOfOrderError {
                    symbol: self.symbol.clone(),
                    timestamp: tick.timestamp,
                    bucket_start: forming_start,
                    tolerance_ms: self.tolerance_ms,
                }
                .into());
            }
            debug!(
                "TickAggregator: {} late tick @ {} folded into forming candle {}",
                self.symbol, tick.timestamp, forming_start
            );
            builder.widen(tick);
            return Ok(None);
        }

        // Later bucket: freeze the forming candle and open the next one.
        let next = Candle::opening(
            self.symbol.clone(),
            self.timeframe,
            bucket,
            tick.price,
            tick.volume,
        );
        let completed = std::mem::replace(builder, CandleBuilder::new(next, tick.timestamp));
        let closed = completed.candle.into_closed();

        debug!(
            "TickAggregator: {} {} candle completed ({} ticks) → O:{} H:{} L:{} C:{} V:{}",
            self.symbol,
            self.timeframe,
            completed.tick_count,
            closed.open,
            closed.high,
            closed.low,
            closed.close,
            closed.volume
        );

        Ok(Some(closed))
    }

    /// Closes the forming candle (end of session, symbol removal or shutdown).
    pub fn flush(&mut self) -> Option<Candle> {
        self.current.take().map(|b| b.candle.into_closed())
    }
}
