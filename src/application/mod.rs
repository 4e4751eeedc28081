// Tick aggregation, resampling and candle windows
pub mod market_data;

// Pivot detection and pattern state machines
pub mod detection;

// Per-symbol pipelines, dedup gate and the engine routing input to them
pub mod pipeline;
