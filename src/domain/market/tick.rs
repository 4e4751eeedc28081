use crate::domain::errors::InputError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A validated trade observation. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub timestamp: i64,
    pub price: Decimal,
    pub volume: u64,
}

impl Tick {
    pub fn new(symbol: impl Into<String>, timestamp: i64, price: Decimal, volume: u64) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            price,
            volume,
        }
    }

    /// Checks the invariants `RawTick::into_tick` enforces, for ticks built directly.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.symbol.trim().is_empty() {
            return Err(InputError::EmptySymbol);
        }
        if self.price <= Decimal::ZERO {
            return Err(InputError::NonPositivePrice {
                symbol: self.symbol.clone(),
                price: self.price,
            });
        }
        if self.timestamp < 0 {
            return Err(InputError::InvalidTimestamp {
                symbol: self.symbol.clone(),
                timestamp: self.timestamp,
            });
        }
        Ok(())
    }
}

/// Unit of incoming tick timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampUnit {
    #[default]
    Millis,
    Micros,
}

impl TimestampUnit {
    pub fn to_millis(&self, raw: i64) -> i64 {
        match self {
            TimestampUnit::Millis => raw,
            TimestampUnit::Micros => raw.div_euclid(1_000),
        }
    }
}

impl FromStr for TimestampUnit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ms" | "millis" | "milliseconds" => Ok(TimestampUnit::Millis),
            "us" | "micros" | "microseconds" => Ok(TimestampUnit::Micros),
            _ => anyhow::bail!("Invalid TICK_TIMESTAMP_UNIT: {}. Must be 'ms' or 'us'", s),
        }
    }
}

/// Tick as it arrives on the wire; every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawTick {
    pub symbol: Option<String>,
    pub timestamp: Option<i64>,
    pub price: Option<Decimal>,
    pub volume: Option<i64>,
}

impl RawTick {
    /// Validates the record and normalises its timestamp to milliseconds.
    pub fn into_tick(self, unit: TimestampUnit) -> Result<Tick, InputError> {
        let symbol = self
            .symbol
            .ok_or(InputError::MissingField { field: "symbol" })?;
        if symbol.trim().is_empty() {
            return Err(InputError::EmptySymbol);
        }
        let timestamp = self
            .timestamp
            .ok_or(InputError::MissingField { field: "timestamp" })?;
        let price = self.price.ok_or(InputError::MissingField { field: "price" })?;
        let volume = self
            .volume
            .ok_or(InputError::MissingField { field: "volume" })?;

        if price <= Decimal::ZERO {
            return Err(InputError::NonPositivePrice { symbol, price });
        }
        if volume < 0 {
            return Err(InputError::NegativeVolume { symbol, volume });
        }
        if timestamp < 0 {
            return Err(InputError::InvalidTimestamp { symbol, timestamp });
        }

        Ok(Tick {
            symbol,
            timestamp: unit.to_millis(timestamp),
            price,
            volume: volume as u64,
        })
    }
}

impl TryFrom<RawTick> for Tick {
    type Error = InputError;

    fn try_from(raw: RawTick) -> Result<Self, Self::Error> {
        raw.into_tick(TimestampUnit::Millis)
    }
}
