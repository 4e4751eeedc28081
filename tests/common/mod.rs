#![allow(dead_code)]

use rust_decimal::Decimal;
use std::sync::Arc;
use swingscope::application::pipeline::SymbolPipeline;
use swingscope::config::Config;
use swingscope::domain::detection::pattern::{Pattern, PatternType};
use swingscope::domain::detection::pivot::Pivot;
use swingscope::domain::events::{ChannelListener, DetectionEvent, EventKind, EventPayload};
use swingscope::domain::market::candle::Candle;
use swingscope::domain::market::tick::Tick;
use swingscope::domain::market::timeframe::MINUTE_MS;
use swingscope::domain::repositories::EntityStore;
use swingscope::infrastructure::EventEmitter;
use swingscope::infrastructure::observability::Metrics;
use tokio::sync::mpsc;

pub const SYMBOL: &str = "NIFTY";

/// L=1, R=1, one attempt per store call.
pub fn config() -> Config {
    let mut config = Config::default();
    config.detection.pivot.left_bars = 1;
    config.detection.pivot.right_bars = 1;
    config.pipeline.retry_attempts = 1;
    config
}

pub struct Harness {
    pub pipeline: SymbolPipeline,
    pub rx: mpsc::UnboundedReceiver<DetectionEvent>,
}

impl Harness {
    /// Pipeline for `SYMBOL`, warmed up from `store`.
    pub async fn start(config: &Config, store: Arc<dyn EntityStore>) -> Self {
        let mut harness = Self::cold(config, store).await;
        harness.pipeline.warm_up().await.expect("warm up");
        harness
    }

    /// Pipeline without warm-up: it knows nothing about previous runs.
    pub async fn cold(config: &Config, store: Arc<dyn EntityStore>) -> Self {
        let emitter = EventEmitter::new();
        let (tx, rx) = mpsc::unbounded_channel();
        emitter.subscribe(Arc::new(ChannelListener::new(tx))).await;
        let pipeline = SymbolPipeline::new(SYMBOL, config, store, emitter, Metrics::default());
        Self { pipeline, rx }
    }

    pub async fn feed(&mut self, ticks: &[Tick]) {
        for tick in ticks {
            self.pipeline.on_tick(tick).await.expect("tick accepted");
        }
    }

    pub fn drain(&mut self) -> Vec<DetectionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }
}

/// One tick per minute, a second into the minute.
pub fn minute_ticks(prices: &[Decimal]) -> Vec<Tick> {
    prices
        .iter()
        .enumerate()
        .map(|(i, p)| Tick::new(SYMBOL, i as i64 * MINUTE_MS + 1_000, *p, 10))
        .collect()
}

pub fn prices(values: &[i64]) -> Vec<Decimal> {
    values.iter().map(|v| Decimal::from(*v)).collect()
}

/// Deterministic zig-zag walk with noise, in cents.
pub fn walk(len: usize, seed: u64) -> Vec<Decimal> {
    let mut state = seed;
    let mut price: i64 = 10_000;
    (0..len)
        .map(|i| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let noise = ((state >> 33) % 200) as i64 - 100;
            let trend = if (i / 7) % 2 == 0 { 35 } else { -35 };
            price = (price + trend + noise).max(1_000);
            Decimal::new(price, 2)
        })
        .collect()
}

pub fn candles(events: &[DetectionEvent]) -> Vec<Candle> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::Candle(c) => Some(c.clone()),
            _ => None,
        })
        .collect()
}

pub fn pivots(events: &[DetectionEvent]) -> Vec<Pivot> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::Pivot(p) => Some(p.clone()),
            _ => None,
        })
        .collect()
}

pub fn patterns(events: &[DetectionEvent], pattern_type: PatternType) -> Vec<Pattern> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::Pattern(p) if p.pattern_type == pattern_type => Some(p.clone()),
            _ => None,
        })
        .collect()
}

pub fn keys(events: &[DetectionEvent]) -> Vec<(EventKind, String)> {
    events
        .iter()
        .map(|e| (e.kind, e.identity_key.clone()))
        .collect()
}
