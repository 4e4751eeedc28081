//! Storage port for the dedup/state layer.
//!
//! The detection core never decides where emissions live; it only needs an
//! [`EntityStore`] that can perform an atomic check-and-set on identity keys
//! and keep per-(symbol, timeframe) watermarks.
//!
//! # Implementations
//!
//! - `InMemoryEntityStore`: `Arc<RwLock>` maps, for tests and single runs
//! - `SqliteEntityStore`: sqlx/SQLite, survives restarts
//!
//! # Example
//!
//! ```rust,no_run
//! use swingscope::domain::repositories::EntityStore;
//! use swingscope::infrastructure::InMemoryEntityStore;
//!
//! # async {
//! let store = InMemoryEntityStore::new();
//! // let inserted = store.insert_incremental(&record).await?;
//! # };
//! ```

use crate::domain::identity::{DedupRecord, EntityKind};
use crate::domain::market::timeframe::Timeframe;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Atomically records `record` if its identity key is unseen.
    /// Returns `true` when this call inserted it.
    async fn insert_incremental(&self, record: &DedupRecord) -> Result<bool>;

    /// Bulk variant used for backfill; one flag per record, in order.
    async fn insert_bulk(&self, records: &[DedupRecord]) -> Result<Vec<bool>>;

    async fn lookup(&self, identity_key: &str) -> Result<Option<DedupRecord>>;

    /// The latest `limit` records of a kind, ordered by event time ascending.
    async fn recent(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        kind: EntityKind,
        limit: usize,
    ) -> Result<Vec<DedupRecord>>;

    async fn load_watermark(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<i64>>;

    async fn save_watermark(&self, symbol: &str, timeframe: Timeframe, watermark: i64)
    -> Result<()>;
}
