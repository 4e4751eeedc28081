use crate::application::detection::pattern_matcher::PatternMatcher;
use crate::application::detection::pivot_detector::PivotDetector;
use crate::application::market_data::candle_series::CandleSeries;
use crate::application::market_data::tick_aggregator::TickAggregator;
use crate::application::market_data::timeframe_aggregator::TimeframeAggregator;
use crate::application::pipeline::dedup_state_store::DedupStateStore;
use crate::config::Config;
use crate::domain::detection::pattern::Pattern;
use crate::domain::detection::pivot::{Pivot, PivotTransition};
use crate::domain::errors::{InputError, PipelineError, StateInconsistencyError};
use crate::domain::events::DetectionEvent;
use crate::domain::identity::DedupRecord;
use crate::domain::market::bucketing::BucketClock;
use crate::domain::market::candle::{Candle, HistoricalBar};
use crate::domain::market::tick::Tick;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::repositories::EntityStore;
use crate::infrastructure::core::RetryPolicy;
use crate::infrastructure::event_bus::EventEmitter;
use crate::infrastructure::observability::Metrics;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A gated emission: the record goes to the dedup store, the event to listeners.
struct Emission {
    record: DedupRecord,
    event: DetectionEvent,
}

impl Emission {
    fn candle(candle: &Candle, now: i64) -> Result<Self, PipelineError> {
        Ok(Self {
            record: DedupRecord::for_candle(candle, now)?,
            event: DetectionEvent::candle_closed(candle.clone(), now),
        })
    }

    fn pivot(pivot: Pivot, now: i64) -> Result<Self, PipelineError> {
        Ok(Self {
            record: DedupRecord::for_pivot(&pivot, now)?,
            event: DetectionEvent::pivot_confirmed(pivot, now),
        })
    }

    fn pattern(pattern: Pattern, now: i64) -> Result<Self, PipelineError> {
        Ok(Self {
            record: DedupRecord::for_pattern(&pattern, now)?,
            event: DetectionEvent::pattern_confirmed(pattern, now),
        })
    }
}

/// Detection state of one (symbol, timeframe).
struct TimeframeUnit {
    series: CandleSeries,
    detector: PivotDetector,
    matchers: Vec<PatternMatcher>,
}

impl TimeframeUnit {
    /// Runs one closed candle through series, detector and matchers.
    /// Returns what should be emitted, in order (the candle itself excluded).
    fn advance(&mut self, candle: &Candle, now: i64) -> Result<Vec<Emission>, PipelineError> {
        let mut out = Vec::new();
        let index = self.series.push(candle.clone())?;

        for transition in self.detector.on_candle(index, candle) {
            for matcher in self.matchers.iter_mut() {
                matcher.on_pivot(&transition);
            }
            if let PivotTransition::Locked(pivot) = transition {
                out.push(Emission::pivot(pivot, now)?);
            }
        }

        for matcher in self.matchers.iter_mut() {
            let Some(pattern) = matcher.on_candle(index, candle) else {
                continue;
            };
            if let Some(missing) = pattern
                .pivots
                .iter()
                .find(|p| !self.detector.is_confirmed(p))
            {
                return Err(StateInconsistencyError::UnconfirmedPivot {
                    pattern: pattern.identity_key(),
                    pivot: missing.identity_key(),
                }
                .into());
            }
            out.push(Emission::pattern(pattern, now)?);
        }

        Ok(out)
    }
}

/// Everything one symbol needs: tick aggregation, resampling, per-timeframe
/// detection and the dedup-gated emission path.
///
/// A pipeline is owned by exactly one worker task; nothing in it is shared
/// except the underlying `EntityStore` and the `EventEmitter`.
pub struct SymbolPipeline {
    symbol: String,
    base: Timeframe,
    clock: BucketClock,
    aggregator: TickAggregator,
    resampler: TimeframeAggregator,
    units: BTreeMap<Timeframe, TimeframeUnit>,
    dedup: DedupStateStore,
    emitter: EventEmitter,
    metrics: Metrics,
    rebuild_tail: usize,
    pending: Vec<Emission>,
}

impl SymbolPipeline {
    pub fn new(
        symbol: impl Into<String>,
        config: &Config,
        store: Arc<dyn EntityStore>,
        emitter: EventEmitter,
        metrics: Metrics,
    ) -> Self {
        let symbol = symbol.into();
        let aggregation = &config.aggregation;
        let clock = aggregation.clock();
        let base = aggregation.base_timeframe;
        let timeframes = aggregation.analysed_timeframes();

        let units = timeframes
            .iter()
            .map(|&tf| {
                (
                    tf,
                    TimeframeUnit {
                        series: CandleSeries::new(
                            symbol.clone(),
                            tf,
                            config.pipeline.series_capacity,
                        ),
                        detector: PivotDetector::new(symbol.clone(), tf, config.detection.pivot),
                        matchers: PatternMatcher::all(&config.detection),
                    },
                )
            })
            .collect();

        let retry = RetryPolicy::new(config.pipeline.retry_attempts, config.pipeline.retry_backoff)
            .with_metrics(metrics.clone());

        Self {
            aggregator: TickAggregator::new(
                symbol.clone(),
                base,
                clock,
                aggregation.tolerance_ms,
            ),
            resampler: TimeframeAggregator::new(clock, base, &timeframes),
            symbol,
            base,
            clock,
            units,
            dedup: DedupStateStore::new(store, retry),
            emitter,
            metrics,
            rebuild_tail: config.pipeline.rebuild_tail,
            pending: Vec::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframes(&self) -> impl Iterator<Item = Timeframe> + '_ {
        self.units.keys().copied()
    }

    pub fn watermark(&self, timeframe: Timeframe) -> Option<i64> {
        self.dedup.watermark(&self.symbol, timeframe)
    }

    /// The base candle currently being formed from ticks.
    pub fn forming_candle(&self) -> Option<&Candle> {
        self.aggregator.peek()
    }

    /// Rebuilds detection windows from the stored candle tail.
    ///
    /// Stored candles are replayed silently; the watermark becomes the larger
    /// of the persisted value and the end of the replayed tail. Pivots and
    /// patterns derived from the newest stored candle go through the dedup
    /// gate: a failure after its candle record was committed may have left
    /// them unrecorded. Base candles of still-forming coarse buckets are then
    /// fed to the resampler through the normal gated path.
    pub async fn warm_up(&mut self) -> Result<(), PipelineError> {
        let timeframes: Vec<Timeframe> = self.units.keys().copied().collect();
        let mut base_tail = Vec::new();
        let now = now_ms();

        for tf in timeframes {
            let persisted = self.dedup.load_watermark(&self.symbol, tf).await?;
            let tail = self
                .dedup
                .recent_candles(&self.symbol, tf, self.rebuild_tail)
                .await?;

            if let Some(unit) = self.units.get_mut(&tf) {
                let newest = tail.len().saturating_sub(1);
                for (i, candle) in tail.iter().enumerate() {
                    let derived = unit.advance(candle, now)?;
                    // Only the newest candle can have derived records missing
                    if i == newest {
                        self.pending.extend(derived);
                    }
                }
            }
            if let Some(end) = tail.last().map(|c| c.bucket_end) {
                self.dedup.advance_watermark(&self.symbol, tf, end);
            }

            info!(
                "SymbolPipeline: {} {} warmed from {} stored candles (watermark {:?}, persisted {:?})",
                self.symbol,
                tf,
                tail.len(),
                self.dedup.watermark(&self.symbol, tf),
                persisted
            );

            if tf == self.base {
                base_tail = tail;
            }
        }

        let coarse_floor = self
            .resampler
            .timeframes()
            .iter()
            .map(|tf| self.dedup.watermark(&self.symbol, *tf).unwrap_or(i64::MIN))
            .min();

        if let Some(floor) = coarse_floor {
            for candle in base_tail.iter().filter(|c| c.bucket_start >= floor) {
                for coarse in self.resampler.process_candle(candle)? {
                    self.process_closed(coarse, now)?;
                }
            }
        }

        self.publish_pending(false).await
    }

    /// Processes one tick. Input and ordering errors leave the state untouched.
    pub async fn on_tick(&mut self, tick: &Tick) -> Result<(), PipelineError> {
        if !self.aggregator.is_forming()
            && let Some(watermark) = self.dedup.watermark(&self.symbol, self.base)
            && tick.timestamp < watermark
        {
            debug!(
                "SymbolPipeline: {} tick @ {} below watermark {}, skipped",
                self.symbol, tick.timestamp, watermark
            );
            return Ok(());
        }

        let closed = match self.aggregator.ingest(tick) {
            Ok(closed) => closed,
            Err(e) => {
                self.metrics.inc_rejected(rejection_reason(&e));
                return Err(e);
            }
        };
        self.metrics.inc_ticks(&self.symbol);

        if let Some(candle) = closed {
            self.process_closed(candle, now_ms())?;
        }
        self.publish_pending(false).await
    }

    /// Processes a batch of historical bars. Invalid bars are logged and
    /// skipped; emissions of the whole batch are recorded with one bulk insert.
    pub async fn on_bars(&mut self, bars: Vec<HistoricalBar>) -> Result<usize, PipelineError> {
        let now = now_ms();
        let mut accepted = 0;

        for bar in bars {
            let candle = match self.validate_bar(bar) {
                Ok(candle) => candle,
                Err(e) => {
                    warn!("SymbolPipeline: {} bar rejected: {}", self.symbol, e);
                    self.metrics.inc_rejected(rejection_reason(&e));
                    continue;
                }
            };
            if self.process_closed(candle, now)? {
                accepted += 1;
            }
        }

        self.publish_pending(true).await?;
        Ok(accepted)
    }

    fn validate_bar(&self, bar: HistoricalBar) -> Result<Candle, PipelineError> {
        if bar.symbol != self.symbol {
            return Err(InputError::SymbolMismatch {
                expected: self.symbol.clone(),
                actual: bar.symbol,
            }
            .into());
        }
        if !self.units.contains_key(&bar.timeframe) {
            return Err(InputError::InvalidBar {
                symbol: bar.symbol,
                bucket_start: bar.bucket_start,
                reason: format!("timeframe {} is not analysed", bar.timeframe),
            }
            .into());
        }
        Ok(bar.into_candle(&self.clock)?)
    }

    /// Closes the forming base candle and every forming coarse candle.
    pub async fn flush(&mut self) -> Result<(), PipelineError> {
        let now = now_ms();
        if let Some(candle) = self.aggregator.flush() {
            self.process_closed(candle, now)?;
        }
        for candle in self.resampler.flush(Some(&self.symbol)) {
            self.process_closed(candle, now)?;
        }
        self.publish_pending(false).await
    }

    pub async fn persist_watermarks(&mut self) -> Result<(), PipelineError> {
        if self.dedup.has_pending_watermarks() {
            self.dedup.persist_watermarks(&self.symbol).await?;
        }
        Ok(())
    }

    /// Watermark gate, detection and resampling for one closed candle.
    /// Returns false when the candle was already processed.
    fn process_closed(&mut self, candle: Candle, now: i64) -> Result<bool, PipelineError> {
        let tf = candle.timeframe;
        if let Some(watermark) = self.dedup.watermark(&self.symbol, tf)
            && candle.bucket_start < watermark
        {
            debug!(
                "SymbolPipeline: {} {} candle @ {} below watermark {}, skipped",
                self.symbol, tf, candle.bucket_start, watermark
            );
            return Ok(false);
        }

        let Some(unit) = self.units.get_mut(&tf) else {
            return Ok(false);
        };

        self.pending.push(Emission::candle(&candle, now)?);
        let emissions = unit.advance(&candle, now)?;
        self.pending.extend(emissions);
        self.dedup
            .advance_watermark(&self.symbol, tf, candle.bucket_end);

        if tf == self.base {
            for coarse in self.resampler.process_candle(&candle)? {
                self.process_closed(coarse, now)?;
            }
        }
        Ok(true)
    }

    /// Passes queued emissions through the dedup gate and publishes the new ones.
    async fn publish_pending(&mut self, bulk: bool) -> Result<(), PipelineError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);

        if bulk {
            let records: Vec<DedupRecord> = pending.iter().map(|e| e.record.clone()).collect();
            let flags = self.dedup.try_emit_bulk(&records).await?;
            for (emission, first) in pending.into_iter().zip(flags) {
                self.publish(emission, first).await;
            }
        } else {
            for emission in pending {
                let first = self.dedup.try_emit(&emission.record).await?;
                self.publish(emission, first).await;
            }
        }
        Ok(())
    }

    async fn publish(&self, emission: Emission, first: bool) {
        let kind = emission.event.kind.as_str();
        if first {
            self.metrics.inc_emitted(kind);
            self.emitter.publish(&emission.event).await;
        } else {
            self.metrics.inc_deduplicated(kind);
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn rejection_reason(err: &PipelineError) -> &'static str {
    match err {
        PipelineError::Input(InputError::OutsideSession { .. }) => "outside_session",
        PipelineError::Input(InputError::SymbolMismatch { .. }) => "symbol_mismatch",
        PipelineError::Input(_) => "invalid_input",
        PipelineError::OutOfOrder(_) => "out_of_order",
        _ => "other",
    }
}
