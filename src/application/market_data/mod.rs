pub mod candle_series;
pub mod tick_aggregator;
pub mod timeframe_aggregator;
