use crate::domain::market::timeframe::Timeframe;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PivotKind {
    High,
    Low,
}

impl PivotKind {
    pub fn opposite(&self) -> PivotKind {
        match self {
            PivotKind::High => PivotKind::Low,
            PivotKind::Low => PivotKind::High,
        }
    }

    /// Whether `a` is strictly beyond `b` in this kind's direction.
    pub fn exceeds(&self, a: Decimal, b: Decimal) -> bool {
        match self {
            PivotKind::High => a > b,
            PivotKind::Low => a < b,
        }
    }
}

impl fmt::Display for PivotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PivotKind::High => write!(f, "HIGH"),
            PivotKind::Low => write!(f, "LOW"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PivotStatus {
    Provisional,
    Confirmed,
    Retracted,
}

/// A swing high or low on one (symbol, timeframe) series.
///
/// `index` is the absolute position of the pivot candle in its series and
/// `time` is that candle's bucket start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pivot {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub index: u64,
    pub time: i64,
    pub price: Decimal,
    pub kind: PivotKind,
    pub status: PivotStatus,
}

impl Pivot {
    pub fn identity_key(&self) -> String {
        format!(
            "pivot:{}:{}:{}:{}",
            self.symbol, self.timeframe, self.time, self.kind
        )
    }

    /// Same-kind comparison; ties favour `self` only if it is earlier.
    pub fn is_more_extreme_than(&self, other: &Pivot) -> bool {
        debug_assert_eq!(self.kind, other.kind);
        if self.price == other.price {
            return self.index < other.index;
        }
        self.kind.exceeds(self.price, other.price)
    }

    pub fn with_status(mut self, status: PivotStatus) -> Self {
        self.status = status;
        self
    }
}

/// State change reported by the pivot detector.
///
/// `Locked` marks a confirmed pivot that can no longer be replaced by a more
/// extreme pivot of the same kind; only locked pivots are published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PivotTransition {
    Provisional(Pivot),
    Confirmed(Pivot),
    Retracted(Pivot),
    Locked(Pivot),
}

impl PivotTransition {
    pub fn pivot(&self) -> &Pivot {
        match self {
            PivotTransition::Provisional(p)
            | PivotTransition::Confirmed(p)
            | PivotTransition::Retracted(p)
            | PivotTransition::Locked(p) => p,
        }
    }
}
