use crate::domain::detection::pivot::Pivot;
use crate::domain::market::timeframe::Timeframe;
use anyhow::anyhow;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternType {
    Vcp,
    DoubleTop,
    DoubleBottom,
}

impl PatternType {
    pub fn name(&self) -> &'static str {
        match self {
            PatternType::Vcp => "VCP",
            PatternType::DoubleTop => "DOUBLE_TOP",
            PatternType::DoubleBottom => "DOUBLE_BOTTOM",
        }
    }

    pub fn all() -> [PatternType; 3] {
        [
            PatternType::Vcp,
            PatternType::DoubleTop,
            PatternType::DoubleBottom,
        ]
    }
}

impl FromStr for PatternType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "VCP" => Ok(PatternType::Vcp),
            "DOUBLE_TOP" => Ok(PatternType::DoubleTop),
            "DOUBLE_BOTTOM" => Ok(PatternType::DoubleBottom),
            _ => Err(anyhow!(
                "Unknown pattern '{}'. Valid options: VCP, DOUBLE_TOP, DOUBLE_BOTTOM",
                s
            )),
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternStatus {
    Pending,
    Confirmed,
    Invalidated,
}

/// A chart pattern built from confirmed pivots.
///
/// Double tops/bottoms carry `[first extreme, retracement, second extreme]`;
/// a VCP carries the alternating HIGH/LOW pivots of its legs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub pattern_type: PatternType,
    pub pivots: Vec<Pivot>,
    pub status: PatternStatus,
    pub start_time: i64,
    pub end_time: i64,
    pub confirmation_time: Option<i64>,
    /// Close of the candle that confirmed the pattern.
    pub breakout_price: Option<Decimal>,
}

impl Pattern {
    /// Pivots whose identities define this pattern.
    pub fn identity_pivots(&self) -> Vec<&Pivot> {
        match self.pattern_type {
            PatternType::DoubleTop | PatternType::DoubleBottom => {
                // The two extremes, not the retracement between them.
                let mut extremes: Vec<&Pivot> = self.pivots.iter().step_by(2).collect();
                extremes.truncate(2);
                extremes
            }
            PatternType::Vcp => self.pivots.iter().collect(),
        }
    }

    pub fn identity_key(&self) -> String {
        let ids: Vec<String> = self
            .identity_pivots()
            .iter()
            .map(|p| p.identity_key())
            .collect();
        format!(
            "pattern:{}:{}:{}:{}",
            self.symbol,
            self.timeframe,
            self.pattern_type,
            ids.join("|")
        )
    }
}
