// Candles, ticks and bucketing
pub mod market;

// Pivots and patterns
pub mod detection;

// Emitted events and listeners
pub mod events;

// Identity keys and dedup records
pub mod identity;

// Storage port
pub mod repositories;

// Domain-specific error types
pub mod errors;
