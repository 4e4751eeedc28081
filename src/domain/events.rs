use crate::domain::detection::pattern::Pattern;
use crate::domain::detection::pivot::Pivot;
use crate::domain::market::candle::Candle;
use crate::domain::market::timeframe::Timeframe;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    CandleClosed,
    PivotConfirmed,
    PatternConfirmed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CandleClosed => "CANDLE_CLOSED",
            EventKind::PivotConfirmed => "PIVOT_CONFIRMED",
            EventKind::PatternConfirmed => "PATTERN_CONFIRMED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Candle(Candle),
    Pivot(Pivot),
    Pattern(Pattern),
}

/// Event published once its identity passed the dedup gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub kind: EventKind,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub payload: EventPayload,
    pub identity_key: String,
    pub emitted_at: i64,
}

impl DetectionEvent {
    pub fn candle_closed(candle: Candle, emitted_at: i64) -> Self {
        Self {
            kind: EventKind::CandleClosed,
            symbol: candle.symbol.clone(),
            timeframe: candle.timeframe,
            identity_key: candle.identity_key(),
            payload: EventPayload::Candle(candle),
            emitted_at,
        }
    }

    pub fn pivot_confirmed(pivot: Pivot, emitted_at: i64) -> Self {
        Self {
            kind: EventKind::PivotConfirmed,
            symbol: pivot.symbol.clone(),
            timeframe: pivot.timeframe,
            identity_key: pivot.identity_key(),
            payload: EventPayload::Pivot(pivot),
            emitted_at,
        }
    }

    pub fn pattern_confirmed(pattern: Pattern, emitted_at: i64) -> Self {
        Self {
            kind: EventKind::PatternConfirmed,
            symbol: pattern.symbol.clone(),
            timeframe: pattern.timeframe,
            identity_key: pattern.identity_key(),
            payload: EventPayload::Pattern(pattern),
            emitted_at,
        }
    }
}

/// Trait for components that react to detection events
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &DetectionEvent);
}

/// Logs every event at info level.
pub struct LoggingListener;

impl EventListener for LoggingListener {
    fn on_event(&self, event: &DetectionEvent) {
        match &event.payload {
            EventPayload::Candle(c) => info!(
                "[{}] {} {} @ {} → O:{} H:{} L:{} C:{} V:{}",
                event.kind, c.symbol, c.timeframe, c.bucket_start, c.open, c.high, c.low, c.close,
                c.volume
            ),
            EventPayload::Pivot(p) => info!(
                "[{}] {} {} {} @ {} price {}",
                event.kind, p.symbol, p.timeframe, p.kind, p.time, p.price
            ),
            EventPayload::Pattern(p) => info!(
                "[{}] {} {} {} ({} pivots) confirmed @ {:?}",
                event.kind,
                p.symbol,
                p.timeframe,
                p.pattern_type,
                p.pivots.len(),
                p.confirmation_time
            ),
        }
    }
}

/// Forwards events into an unbounded channel.
pub struct ChannelListener {
    tx: UnboundedSender<DetectionEvent>,
}

impl ChannelListener {
    pub fn new(tx: UnboundedSender<DetectionEvent>) -> Self {
        Self { tx }
    }
}

impl EventListener for ChannelListener {
    fn on_event(&self, event: &DetectionEvent) {
        // A dropped receiver only means nobody is listening anymore.
        let _ = self.tx.send(event.clone());
    }
}
