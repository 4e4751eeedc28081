// Bucketing and OHLCV types
pub mod bucketing;
pub mod candle;
pub mod tick;
pub mod timeframe;
