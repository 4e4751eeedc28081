//! In-Memory Store Implementation
//!
//! Thread-safe, in-memory implementation of the `EntityStore` port defined
//! in `domain::repositories`.
//!
//! # Limitations
//!
//! - Data is lost on application restart
//! - Limited by available RAM
//!
//! For persistence across restarts use `SqliteEntityStore`.

use crate::domain::identity::{DedupRecord, EntityKind};
use crate::domain::market::timeframe::Timeframe;
use crate::domain::repositories::EntityStore;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory implementation of EntityStore
/// Suitable for testing and single-instance deployments
#[derive(Clone, Default)]
pub struct InMemoryEntityStore {
    records: Arc<RwLock<HashMap<String, DedupRecord>>>,
    watermarks: Arc<RwLock<HashMap<(String, Timeframe), i64>>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// All records of a kind, ordered by event time.
    pub async fn records_of_kind(&self, kind: EntityKind) -> Vec<DedupRecord> {
        let mut out: Vec<DedupRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            (a.event_time, &a.identity_key).cmp(&(b.event_time, &b.identity_key))
        });
        out
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn insert_incremental(&self, record: &DedupRecord) -> Result<bool> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.identity_key) {
            return Ok(false);
        }
        records.insert(record.identity_key.clone(), record.clone());
        Ok(true)
    }

    async fn insert_bulk(&self, batch: &[DedupRecord]) -> Result<Vec<bool>> {
        let mut records = self.records.write().await;
        Ok(batch
            .iter()
            .map(|record| {
                if records.contains_key(&record.identity_key) {
                    false
                } else {
                    records.insert(record.identity_key.clone(), record.clone());
                    true
                }
            })
            .collect())
    }

    async fn lookup(&self, identity_key: &str) -> Result<Option<DedupRecord>> {
        Ok(self.records.read().await.get(identity_key).cloned())
    }

    async fn recent(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        kind: EntityKind,
        limit: usize,
    ) -> Result<Vec<DedupRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<&DedupRecord> = records
            .values()
            .filter(|r| r.symbol == symbol && r.timeframe == timeframe && r.kind == kind)
            .collect();
        matching.sort_by_key(|r| r.event_time);

        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).cloned().collect())
    }

    async fn load_watermark(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<i64>> {
        Ok(self
            .watermarks
            .read()
            .await
            .get(&(symbol.to_string(), timeframe))
            .copied())
    }

    async fn save_watermark(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        watermark: i64,
    ) -> Result<()> {
        let mut watermarks = self.watermarks.write().await;
        let entry = watermarks
            .entry((symbol.to_string(), timeframe))
            .or_insert(watermark);
        *entry = (*entry).max(watermark);
        Ok(())
    }
}
