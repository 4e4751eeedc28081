pub mod database;
pub mod sqlite_store;

pub use database::Database;
pub use sqlite_store::SqliteEntityStore;
