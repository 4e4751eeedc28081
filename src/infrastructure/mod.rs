pub mod core;
pub mod csv_bars;
pub mod event_bus;
pub mod observability;
pub mod persistence;
pub mod repositories;

pub use csv_bars::{CsvBarReader, CsvCandleStorage};
pub use event_bus::EventEmitter;
pub use persistence::SqliteEntityStore;
pub use repositories::InMemoryEntityStore;
