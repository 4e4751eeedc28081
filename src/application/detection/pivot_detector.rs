use crate::config::PivotConfig;
use crate::domain::detection::pivot::{Pivot, PivotKind, PivotStatus, PivotTransition};
use crate::domain::market::candle::Candle;
use crate::domain::market::timeframe::Timeframe;
use rust_decimal::Decimal;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Locked pivots remembered for pattern verification.
const PIVOT_REGISTRY_CAPACITY: usize = 1_024;

#[derive(Debug, Clone)]
struct PendingPivot {
    pivot: Pivot,
    remaining: usize,
    bullish: bool,
}

/// Incremental swing-pivot detection over one candle series.
///
/// A candle is a provisional HIGH when its high strictly exceeds the highs of
/// the `L` preceding candles (LOW is symmetric). It is confirmed once `R`
/// further candles close without a strictly more extreme value, and retracted
/// otherwise. Confirmed pivots alternate in kind: a same-kind confirmation
/// keeps only the more extreme of the two. The latest confirmed pivot is
/// locked, and may be published, once an opposite-kind pivot is confirmed
/// after it.
#[derive(Debug)]
pub struct PivotDetector {
    symbol: String,
    timeframe: Timeframe,
    config: PivotConfig,
    /// (high, low) of the last `L` candles
    window: VecDeque<(Decimal, Decimal)>,
    pending: Vec<PendingPivot>,
    /// Latest confirmed pivot, not yet locked
    head: Option<Pivot>,
    locked: VecDeque<Pivot>,
    locked_keys: HashSet<String>,
}

impl PivotDetector {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, config: PivotConfig) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            config,
            window: VecDeque::with_capacity(config.left_bars + 1),
            pending: Vec::new(),
            head: None,
            locked: VecDeque::new(),
            locked_keys: HashSet::new(),
        }
    }

    /// Feeds the closed candle at absolute `index` and returns the resulting
    /// transitions in the order they happened.
    pub fn on_candle(&mut self, index: u64, candle: &Candle) -> Vec<PivotTransition> {
        let mut transitions = Vec::new();
        let mut confirmations = Vec::new();

        // 1. Advance pending pivots through their confirmation window
        for mut pending in std::mem::take(&mut self.pending) {
            let value = match pending.pivot.kind {
                PivotKind::High => candle.high,
                PivotKind::Low => candle.low,
            };
            if pending.pivot.kind.exceeds(value, pending.pivot.price) {
                debug!(
                    "PivotDetector: {} {} provisional {} @ {} retracted by candle {}",
                    self.symbol, self.timeframe, pending.pivot.kind, pending.pivot.price, index
                );
                transitions.push(PivotTransition::Retracted(
                    pending.pivot.with_status(PivotStatus::Retracted),
                ));
                continue;
            }
            pending.remaining -= 1;
            if pending.remaining == 0 {
                confirmations.push(pending);
            } else {
                self.pending.push(pending);
            }
        }

        // 2. Same pivot candle confirming both kinds: order by candle direction
        confirmations.sort_by_key(|p| {
            let low_first = p.bullish;
            let rank = match (p.pivot.kind, low_first) {
                (PivotKind::Low, true) | (PivotKind::High, false) => 0,
                _ => 1,
            };
            (p.pivot.index, rank)
        });

        for pending in confirmations {
            self.apply_confirmation(
                pending.pivot.with_status(PivotStatus::Confirmed),
                &mut transitions,
            );
        }

        // 3. Is this candle itself a provisional pivot?
        if self.window.len() == self.config.left_bars {
            let is_high = self.window.iter().all(|(h, _)| candle.high > *h);
            let is_low = self.window.iter().all(|(_, l)| candle.low < *l);

            for (kind, hit, price) in [
                (PivotKind::High, is_high, candle.high),
                (PivotKind::Low, is_low, candle.low),
            ] {
                if !hit {
                    continue;
                }
                let pivot = Pivot {
                    symbol: self.symbol.clone(),
                    timeframe: self.timeframe,
                    index,
                    time: candle.bucket_start,
                    price,
                    kind,
                    status: PivotStatus::Provisional,
                };
                transitions.push(PivotTransition::Provisional(pivot.clone()));
                self.pending.push(PendingPivot {
                    pivot,
                    remaining: self.config.right_bars,
                    bullish: candle.is_bullish(),
                });
            }
        }

        self.window.push_back((candle.high, candle.low));
        while self.window.len() > self.config.left_bars {
            self.window.pop_front();
        }

        transitions
    }

    fn apply_confirmation(&mut self, pivot: Pivot, out: &mut Vec<PivotTransition>) {
        match self.head.take() {
            None => {
                self.head = Some(pivot.clone());
                out.push(PivotTransition::Confirmed(pivot));
            }
            Some(head) if head.kind == pivot.kind => {
                if pivot.is_more_extreme_than(&head) {
                    debug!(
                        "PivotDetector: {} {} {} @ {} replaces {} @ {}",
                        self.symbol, self.timeframe, pivot.kind, pivot.price, head.kind, head.price
                    );
                    out.push(PivotTransition::Retracted(
                        head.with_status(PivotStatus::Retracted),
                    ));
                    self.head = Some(pivot.clone());
                    out.push(PivotTransition::Confirmed(pivot));
                } else {
                    out.push(PivotTransition::Retracted(
                        pivot.with_status(PivotStatus::Retracted),
                    ));
                    self.head = Some(head);
                }
            }
            Some(head) => {
                self.lock(head.clone());
                out.push(PivotTransition::Locked(head));
                self.head = Some(pivot.clone());
                out.push(PivotTransition::Confirmed(pivot));
            }
        }
    }

    fn lock(&mut self, pivot: Pivot) {
        self.locked_keys.insert(pivot.identity_key());
        self.locked.push_back(pivot);
        if self.locked.len() > PIVOT_REGISTRY_CAPACITY
            && let Some(evicted) = self.locked.pop_front()
        {
            self.locked_keys.remove(&evicted.identity_key());
        }
    }

    /// Whether `pivot` is currently confirmed (locked, or the unlocked head).
    pub fn is_confirmed(&self, pivot: &Pivot) -> bool {
        let key = pivot.identity_key();
        self.locked_keys.contains(&key)
            || self
                .head
                .as_ref()
                .is_some_and(|h| h.identity_key() == key)
    }

    pub fn head(&self) -> Option<&Pivot> {
        self.head.as_ref()
    }

    pub fn locked_pivots(&self) -> impl Iterator<Item = &Pivot> {
        self.locked.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
