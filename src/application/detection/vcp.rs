use crate::config::VcpConfig;
use crate::domain::detection::pattern::{Pattern, PatternStatus, PatternType};
use crate::domain::detection::pivot::{Pivot, PivotKind, PivotTransition};
use crate::domain::market::candle::Candle;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use tracing::debug;

/// One contraction: a confirmed HIGH and the next confirmed LOW.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leg {
    pub high: Pivot,
    pub low: Pivot,
    pub volume: u64,
}

impl Leg {
    pub fn range(&self) -> Decimal {
        self.high.price - self.low.price
    }
}

/// Volatility Contraction Pattern matcher.
///
/// Collects successive legs with strictly decreasing range (and optionally
/// volume). Once at least N legs exist, a close above the highest leg high
/// within `breakout_bars` of the last low confirms the pattern.
#[derive(Debug, Clone)]
pub struct VcpMatcher {
    config: VcpConfig,
    pending_high: Option<Pivot>,
    legs: Vec<Leg>,
    /// Candidate before the last leg was added, restored if that leg's low is retracted
    before_last_leg: Vec<Leg>,
    /// (index, volume) of recent candles
    volumes: VecDeque<(u64, u64)>,
}

impl VcpMatcher {
    pub fn new(config: VcpConfig) -> Self {
        Self {
            config,
            pending_high: None,
            legs: Vec::new(),
            before_last_leg: Vec::new(),
            volumes: VecDeque::new(),
        }
    }

    pub fn legs(&self) -> &[Leg] {
        &self.legs
    }

    pub fn is_armed(&self) -> bool {
        self.legs.len() >= self.config.min_contractions
    }

    pub fn reset(&mut self) {
        self.pending_high = None;
        self.legs.clear();
        self.before_last_leg.clear();
    }

    fn leg_volume(&self, from: u64, to: u64) -> u64 {
        self.volumes
            .iter()
            .filter(|(i, _)| *i >= from && *i <= to)
            .map(|(_, v)| *v)
            .sum()
    }

    fn contracts(&self, previous: &Leg, next: &Leg) -> bool {
        next.range() < previous.range()
            && (!self.config.require_volume_contraction || next.volume < previous.volume)
    }

    pub fn on_pivot(&mut self, transition: &PivotTransition) {
        match transition {
            PivotTransition::Confirmed(pivot) => match pivot.kind {
                PivotKind::High => self.pending_high = Some(pivot.clone()),
                PivotKind::Low => {
                    if let Some(high) = self.pending_high.take() {
                        let leg = Leg {
                            volume: self.leg_volume(high.index, pivot.index),
                            high,
                            low: pivot.clone(),
                        };
                        self.add_leg(leg);
                    }
                }
            },
            PivotTransition::Retracted(pivot) => {
                let key = pivot.identity_key();
                if self
                    .pending_high
                    .as_ref()
                    .is_some_and(|h| h.identity_key() == key)
                {
                    self.pending_high = None;
                } else if self
                    .legs
                    .last()
                    .is_some_and(|leg| leg.low.identity_key() == key)
                    && let Some(leg) = self.legs.pop()
                {
                    self.legs = std::mem::take(&mut self.before_last_leg);
                    self.pending_high = Some(leg.high);
                }
            }
            PivotTransition::Provisional(_) | PivotTransition::Locked(_) => {}
        }
    }

    fn add_leg(&mut self, leg: Leg) {
        self.before_last_leg = self.legs.clone();
        match self.legs.last() {
            Some(previous) if self.contracts(previous, &leg) => {
                debug!(
                    "VCP: {} leg {} range {} (prev {})",
                    leg.high.symbol,
                    self.legs.len() + 1,
                    leg.range(),
                    previous.range()
                );
                self.legs.push(leg);
            }
            _ => {
                // Fresh candidate rooted at this leg
                self.legs = vec![leg];
            }
        }
    }

    pub fn on_candle(&mut self, index: u64, candle: &Candle) -> Option<Pattern> {
        self.volumes.push_back((index, candle.volume));
        let keep = self.config.lookback_bars + self.config.breakout_bars + 1;
        while self.volumes.len() > keep {
            self.volumes.pop_front();
        }

        let first = self.legs.first()?;
        let last = self.legs.last()?;

        let lowest_low = self.legs.iter().map(|l| l.low.price).min()?;
        if candle.low < lowest_low {
            debug!(
                "VCP: {} candle low {} undercut sequence low {}, invalidated",
                candle.symbol, candle.low, lowest_low
            );
            self.legs.clear();
            self.before_last_leg.clear();
            return None;
        }

        if !self.is_armed() {
            if index.saturating_sub(first.high.index) > self.config.lookback_bars as u64 {
                debug!(
                    "VCP: {} only {} legs within lookback, invalidated",
                    candle.symbol,
                    self.legs.len()
                );
                self.legs.clear();
                self.before_last_leg.clear();
            }
            return None;
        }

        let since_last_low = index.saturating_sub(last.low.index);
        let highest_high = self.legs.iter().map(|l| l.high.price).max()?;

        if candle.close > highest_high && since_last_low <= self.config.breakout_bars as u64 {
            let pivots: Vec<Pivot> = self
                .legs
                .iter()
                .flat_map(|l| [l.high.clone(), l.low.clone()])
                .collect();
            let pattern = Pattern {
                symbol: candle.symbol.clone(),
                timeframe: candle.timeframe,
                pattern_type: PatternType::Vcp,
                start_time: first.high.time,
                end_time: last.low.time,
                pivots,
                status: PatternStatus::Confirmed,
                confirmation_time: Some(candle.bucket_start),
                breakout_price: Some(candle.close),
            };
            self.legs.clear();
            self.before_last_leg.clear();
            return Some(pattern);
        }

        if since_last_low > self.config.breakout_bars as u64 {
            debug!(
                "VCP: {} no breakout within {} bars, invalidated",
                candle.symbol, self.config.breakout_bars
            );
            self.legs.clear();
            self.before_last_leg.clear();
        }

        None
    }
}
