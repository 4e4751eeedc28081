use thiserror::Error;
use rust_decimal::Decimal;

/// Malformed or out-of-range input data. Logged and skipped; never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("Missing field '{field}' in input record")]
    MissingField { field: &'static str },

    #[error("Empty symbol in input record")]
    EmptySymbol,

    #[error("Non-positive price for {symbol}: {price}")]
    NonPositivePrice { symbol: String, price: Decimal },

    #[error("Negative volume for {symbol}: {volume}")]
    NegativeVolume { symbol: String, volume: i64 },

    #[error("Invalid timestamp {timestamp} for {symbol}")]
    InvalidTimestamp { symbol: String, timestamp: i64 },

    #[error("Invalid bar for {symbol} @ {bucket_start}: {reason}")]
    InvalidBar {
        symbol: String,
        bucket_start: i64,
        reason: String,
    },

    #[error("Input for {actual} routed to pipeline of {expected}")]
    SymbolMismatch { expected: String, actual: String },

    #[error("Timestamp {timestamp} for {symbol} is outside the trading session")]
    OutsideSession { symbol: String, timestamp: i64 },
}

/// A tick arrived too far behind the candle currently being formed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Out-of-order tick for {symbol}: ts {timestamp} < bucket start {bucket_start} - tolerance {tolerance_ms}ms"
)]
pub struct OutOfOrderError {
    pub symbol: String,
    pub timestamp: i64,
    pub bucket_start: i64,
    pub tolerance_ms: i64,
}

/// Failures of the dedup/state store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Store unavailable during {operation}: {reason}")]
    Unavailable { operation: String, reason: String },

    #[error("Store operation '{operation}' failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        reason: String,
    },

    #[error("Payload of {identity_key} could not be encoded: {reason}")]
    Payload { identity_key: String, reason: String },
}

/// Internal invariants of the detection state were violated. Fatal for the symbol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateInconsistencyError {
    #[error("Pattern {pattern} references pivot {pivot} which is not confirmed")]
    UnconfirmedPivot { pattern: String, pivot: String },

    #[error("Candle series for {symbol} {timeframe} received {bucket_start} after {last_start}")]
    SeriesOrder {
        symbol: String,
        timeframe: String,
        bucket_start: i64,
        last_start: i64,
    },
}

/// Umbrella error surfaced by a symbol pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    OutOfOrder(#[from] OutOfOrderError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    StateInconsistency(#[from] StateInconsistencyError),

    #[error("Pipeline for {symbol} is stopped")]
    Stopped { symbol: String },
}

impl PipelineError {
    /// Fatal errors stop the affected symbol's pipeline; the rest are logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Storage(_)
                | PipelineError::StateInconsistency(_)
                | PipelineError::Stopped { .. }
        )
    }
}
