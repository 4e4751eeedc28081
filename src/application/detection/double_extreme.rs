use crate::config::DoublePatternConfig;
use crate::domain::detection::pattern::{Pattern, PatternStatus, PatternType};
use crate::domain::detection::pivot::{Pivot, PivotKind, PivotTransition};
use crate::domain::market::candle::Candle;
use rust_decimal::Decimal;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoubleState {
    SeekingFirstExtreme,
    SeekingRetracement {
        first: Pivot,
    },
    SeekingSecondExtreme {
        first: Pivot,
        trough: Pivot,
    },
    SeekingBreak {
        first: Pivot,
        trough: Pivot,
        second: Pivot,
    },
}

/// Double top (two HIGH extremes) or double bottom (two LOW extremes).
///
/// The retracement pivot between the extremes is called `trough` for both
/// variants; for a double bottom it is the intermediate peak.
#[derive(Debug, Clone)]
pub struct DoubleExtremeMatcher {
    pattern_type: PatternType,
    extreme: PivotKind,
    config: DoublePatternConfig,
    state: DoubleState,
}

impl DoubleExtremeMatcher {
    pub fn double_top(config: DoublePatternConfig) -> Self {
        Self {
            pattern_type: PatternType::DoubleTop,
            extreme: PivotKind::High,
            config,
            state: DoubleState::SeekingFirstExtreme,
        }
    }

    pub fn double_bottom(config: DoublePatternConfig) -> Self {
        Self {
            pattern_type: PatternType::DoubleBottom,
            extreme: PivotKind::Low,
            config,
            state: DoubleState::SeekingFirstExtreme,
        }
    }

    pub fn pattern_type(&self) -> PatternType {
        self.pattern_type
    }

    pub fn state(&self) -> &DoubleState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = DoubleState::SeekingFirstExtreme;
    }

    fn band(&self, first: &Pivot) -> Decimal {
        first.price * self.config.tolerance_pct
    }

    fn within_band(&self, first: &Pivot, candidate: &Pivot) -> bool {
        (candidate.price - first.price).abs() <= self.band(first)
    }

    /// `candidate` lies beyond the band on the far side of the first extreme.
    fn breaks_band(&self, first: &Pivot, candidate: &Pivot) -> bool {
        let band = self.band(first);
        match self.extreme {
            PivotKind::High => candidate.price > first.price + band,
            PivotKind::Low => candidate.price < first.price - band,
        }
    }

    fn retracement_ok(&self, first: &Pivot, trough: &Pivot) -> bool {
        if first.price.is_zero() {
            return false;
        }
        let depth = match self.extreme {
            PivotKind::High => first.price - trough.price,
            PivotKind::Low => trough.price - first.price,
        };
        depth / first.price >= self.config.min_retracement_pct
    }

    fn too_far_apart(&self, earlier: &Pivot, later_time: i64) -> bool {
        later_time - earlier.time > self.config.max_window_ms
    }

    pub fn on_pivot(&mut self, transition: &PivotTransition) {
        match transition {
            PivotTransition::Confirmed(pivot) => self.on_confirmed(pivot.clone()),
            PivotTransition::Retracted(pivot) => self.on_retracted(pivot),
            PivotTransition::Provisional(_) | PivotTransition::Locked(_) => {}
        }
    }

    fn on_confirmed(&mut self, pivot: Pivot) {
        let state = std::mem::replace(&mut self.state, DoubleState::SeekingFirstExtreme);
        let is_extreme = pivot.kind == self.extreme;

        self.state = match state {
            DoubleState::SeekingFirstExtreme => {
                if is_extreme {
                    DoubleState::SeekingRetracement { first: pivot }
                } else {
                    DoubleState::SeekingFirstExtreme
                }
            }

            DoubleState::SeekingRetracement { first } => {
                if is_extreme {
                    // No valid retracement since `first`: keep the more extreme candidate
                    if pivot.kind.exceeds(pivot.price, first.price) {
                        DoubleState::SeekingRetracement { first: pivot }
                    } else {
                        DoubleState::SeekingRetracement { first }
                    }
                } else if self.too_far_apart(&first, pivot.time) {
                    DoubleState::SeekingFirstExtreme
                } else if self.retracement_ok(&first, &pivot) {
                    DoubleState::SeekingSecondExtreme {
                        first,
                        trough: pivot,
                    }
                } else {
                    DoubleState::SeekingRetracement { first }
                }
            }

            DoubleState::SeekingSecondExtreme { first, trough } => {
                if !is_extreme {
                    // Deeper retracement replaces the trough
                    if pivot.kind.exceeds(pivot.price, trough.price) {
                        DoubleState::SeekingSecondExtreme {
                            first,
                            trough: pivot,
                        }
                    } else {
                        DoubleState::SeekingSecondExtreme { first, trough }
                    }
                } else if self.too_far_apart(&first, pivot.time) {
                    debug!(
                        "{}: second extreme @ {} outside window of {}, restarting",
                        self.pattern_type, pivot.price, first.price
                    );
                    DoubleState::SeekingRetracement { first: pivot }
                } else if self.within_band(&first, &pivot) {
                    debug!(
                        "{}: {} {} / {} matched, awaiting break of {}",
                        self.pattern_type, pivot.symbol, first.price, pivot.price, trough.price
                    );
                    DoubleState::SeekingBreak {
                        first,
                        trough,
                        second: pivot,
                    }
                } else {
                    // Beyond the band, or short of it: this pivot becomes the new first extreme
                    DoubleState::SeekingRetracement { first: pivot }
                }
            }

            DoubleState::SeekingBreak {
                first,
                trough,
                second,
            } => {
                if is_extreme && self.breaks_band(&first, &pivot) {
                    debug!(
                        "{}: {} pivot @ {} broke the band of {}, invalidated",
                        self.pattern_type, pivot.symbol, pivot.price, first.price
                    );
                    DoubleState::SeekingRetracement { first: pivot }
                } else {
                    DoubleState::SeekingBreak {
                        first,
                        trough,
                        second,
                    }
                }
            }
        };
    }

    /// Drops a retracted constituent and everything after it.
    fn on_retracted(&mut self, pivot: &Pivot) {
        let key = pivot.identity_key();
        let state = std::mem::replace(&mut self.state, DoubleState::SeekingFirstExtreme);

        self.state = match state {
            DoubleState::SeekingRetracement { first } if first.identity_key() == key => {
                DoubleState::SeekingFirstExtreme
            }
            DoubleState::SeekingSecondExtreme { first, trough } => {
                if first.identity_key() == key {
                    DoubleState::SeekingFirstExtreme
                } else if trough.identity_key() == key {
                    DoubleState::SeekingRetracement { first }
                } else {
                    DoubleState::SeekingSecondExtreme { first, trough }
                }
            }
            DoubleState::SeekingBreak {
                first,
                trough,
                second,
            } => {
                if first.identity_key() == key {
                    DoubleState::SeekingFirstExtreme
                } else if trough.identity_key() == key {
                    DoubleState::SeekingRetracement { first }
                } else if second.identity_key() == key {
                    DoubleState::SeekingSecondExtreme { first, trough }
                } else {
                    DoubleState::SeekingBreak {
                        first,
                        trough,
                        second,
                    }
                }
            }
            other => other,
        };
    }

    /// Checks the breakout on a closed candle. Returns the confirmed pattern
    /// and drops it from tracking.
    pub fn on_candle(&mut self, candle: &Candle) -> Option<Pattern> {
        let DoubleState::SeekingBreak {
            first,
            trough,
            second,
        } = &self.state
        else {
            return None;
        };

        let broke = match self.extreme {
            PivotKind::High => candle.close < trough.price,
            PivotKind::Low => candle.close > trough.price,
        };

        if broke {
            let pattern = Pattern {
                symbol: first.symbol.clone(),
                timeframe: first.timeframe,
                pattern_type: self.pattern_type,
                pivots: vec![first.clone(), trough.clone(), second.clone()],
                status: PatternStatus::Confirmed,
                start_time: first.time,
                end_time: second.time,
                confirmation_time: Some(candle.bucket_start),
                breakout_price: Some(candle.close),
            };
            self.state = DoubleState::SeekingFirstExtreme;
            return Some(pattern);
        }

        if self.too_far_apart(second, candle.bucket_start) {
            debug!(
                "{}: {} no break of {} within window, invalidated",
                self.pattern_type, candle.symbol, trough.price
            );
            self.state = DoubleState::SeekingFirstExtreme;
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::detection::pivot::PivotStatus;
    use crate::domain::market::bucketing::Bucket;
    use crate::domain::market::timeframe::{MINUTE_MS, Timeframe};
    use rust_decimal_macros::dec;

    fn pivot(index: u64, price: Decimal, kind: PivotKind) -> Pivot {
        Pivot {
            symbol: "AAPL".to_string(),
            timeframe: Timeframe::ONE_MIN,
            index,
            time: index as i64 * MINUTE_MS,
            price,
            kind,
            status: PivotStatus::Confirmed,
        }
    }

    fn confirmed(index: u64, price: Decimal, kind: PivotKind) -> PivotTransition {
        PivotTransition::Confirmed(pivot(index, price, kind))
    }

    fn close_at(index: i64, close: Decimal) -> Candle {
        let mut c = Candle::opening(
            "AAPL",
            Timeframe::ONE_MIN,
            Bucket {
                start: index * MINUTE_MS,
                end: (index + 1) * MINUTE_MS,
            },
            close,
            1,
        );
        c.close = close;
        c.into_closed()
    }

    fn config() -> DoublePatternConfig {
        DoublePatternConfig {
            tolerance_pct: dec!(0.01),
            max_window_ms: 60 * MINUTE_MS,
            min_retracement_pct: dec!(0.05),
        }
    }

    #[test]
    fn test_double_top_confirms_on_break() {
        let mut m = DoubleExtremeMatcher::double_top(config());
        m.on_pivot(&confirmed(2, dec!(100), PivotKind::High));
        m.on_pivot(&confirmed(5, dec!(90), PivotKind::Low));
        m.on_pivot(&confirmed(8, dec!(101), PivotKind::High));
        assert!(matches!(m.state(), DoubleState::SeekingBreak { .. }));

        assert!(m.on_candle(&close_at(10, dec!(91))).is_none());
        let pattern = m.on_candle(&close_at(11, dec!(89.5))).unwrap();
        assert_eq!(pattern.pattern_type, PatternType::DoubleTop);
        assert_eq!(pattern.status, PatternStatus::Confirmed);
        assert_eq!(pattern.pivots.len(), 3);
        assert_eq!(pattern.confirmation_time, Some(11 * MINUTE_MS));
        assert_eq!(m.state(), &DoubleState::SeekingFirstExtreme);
    }

    #[test]
    fn test_double_bottom_mirrors_top() {
        let mut m = DoubleExtremeMatcher::double_bottom(config());
        m.on_pivot(&confirmed(1, dec!(50), PivotKind::Low));
        m.on_pivot(&confirmed(3, dec!(55), PivotKind::High));
        m.on_pivot(&confirmed(6, dec!(50.2), PivotKind::Low));
        let pattern = m.on_candle(&close_at(7, dec!(55.5))).unwrap();
        assert_eq!(pattern.pattern_type, PatternType::DoubleBottom);
        assert_eq!(pattern.breakout_price, Some(dec!(55.5)));
    }

    #[test]
    fn test_shallow_retracement_not_accepted() {
        let mut m = DoubleExtremeMatcher::double_top(config());
        m.on_pivot(&confirmed(2, dec!(100), PivotKind::High));
        m.on_pivot(&confirmed(4, dec!(98), PivotKind::Low));
        assert!(matches!(m.state(), DoubleState::SeekingRetracement { .. }));
    }

    #[test]
    fn test_breaking_pivot_becomes_new_first() {
        let mut m = DoubleExtremeMatcher::double_top(config());
        m.on_pivot(&confirmed(2, dec!(100), PivotKind::High));
        m.on_pivot(&confirmed(5, dec!(90), PivotKind::Low));
        m.on_pivot(&confirmed(8, dec!(105), PivotKind::High));
        match m.state() {
            DoubleState::SeekingRetracement { first } => assert_eq!(first.price, dec!(105)),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_window_exceeded_restarts() {
        let mut m = DoubleExtremeMatcher::double_top(config());
        m.on_pivot(&confirmed(2, dec!(100), PivotKind::High));
        m.on_pivot(&confirmed(30, dec!(90), PivotKind::Low));
        m.on_pivot(&confirmed(70, dec!(100.5), PivotKind::High));
        match m.state() {
            DoubleState::SeekingRetracement { first } => assert_eq!(first.index, 70),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_no_break_within_window_invalidates() {
        let mut m = DoubleExtremeMatcher::double_top(config());
        m.on_pivot(&confirmed(2, dec!(100), PivotKind::High));
        m.on_pivot(&confirmed(5, dec!(90), PivotKind::Low));
        m.on_pivot(&confirmed(8, dec!(100), PivotKind::High));
        assert!(m.on_candle(&close_at(69, dec!(95))).is_none());
        assert_eq!(m.state(), &DoubleState::SeekingFirstExtreme);
    }

    #[test]
    fn test_retracted_second_extreme_rolls_back() {
        let mut m = DoubleExtremeMatcher::double_top(config());
        m.on_pivot(&confirmed(2, dec!(100), PivotKind::High));
        m.on_pivot(&confirmed(5, dec!(90), PivotKind::Low));
        m.on_pivot(&confirmed(8, dec!(99.5), PivotKind::High));
        m.on_pivot(&PivotTransition::Retracted(pivot(8, dec!(99.5), PivotKind::High)));
        assert!(matches!(m.state(), DoubleState::SeekingSecondExtreme { .. }));

        m.on_pivot(&confirmed(9, dec!(100.8), PivotKind::High));
        match m.state() {
            DoubleState::SeekingBreak { second, .. } => assert_eq!(second.price, dec!(100.8)),
            other => panic!("unexpected state {:?}", other),
        }
    }
}
