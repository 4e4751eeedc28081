use crate::domain::errors::StorageError;
use crate::domain::identity::{DedupRecord, EntityKind};
use crate::domain::market::candle::Candle;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::repositories::EntityStore;
use crate::infrastructure::core::RetryPolicy;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Emission gate and watermark cache in front of an `EntityStore`.
///
/// Identity checks always go to the store (atomic check-and-set there), so
/// several pipelines may share one store. Watermarks are cached per
/// (symbol, timeframe) and written back by `persist_watermarks`.
pub struct DedupStateStore {
    store: Arc<dyn EntityStore>,
    retry: RetryPolicy,
    watermarks: HashMap<(String, Timeframe), i64>,
    dirty: HashSet<(String, Timeframe)>,
}

impl DedupStateStore {
    pub fn new(store: Arc<dyn EntityStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            watermarks: HashMap::new(),
            dirty: HashSet::new(),
        }
    }

    /// Records the identity of `record`. `true` means first emission, proceed.
    pub async fn try_emit(&self, record: &DedupRecord) -> Result<bool, StorageError> {
        let store = &self.store;
        let inserted = self
            .retry
            .run("insert_incremental", move || store.insert_incremental(record))
            .await?;
        if !inserted {
            debug!(
                "DedupStateStore: {} already emitted, suppressed",
                record.identity_key
            );
        }
        Ok(inserted)
    }

    /// Bulk variant used for backfills; one flag per record, in order.
    pub async fn try_emit_bulk(&self, records: &[DedupRecord]) -> Result<Vec<bool>, StorageError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let store = &self.store;
        let flags = self
            .retry
            .run("insert_bulk", move || store.insert_bulk(records))
            .await?;
        if flags.len() != records.len() {
            return Err(StorageError::Unavailable {
                operation: "insert_bulk".to_string(),
                reason: format!(
                    "store answered {} flags for {} records",
                    flags.len(),
                    records.len()
                ),
            });
        }
        Ok(flags)
    }

    pub async fn lookup(&self, identity_key: &str) -> Result<Option<DedupRecord>, StorageError> {
        let store = &self.store;
        self.retry
            .run("lookup", move || store.lookup(identity_key))
            .await
    }

    /// Loads the persisted watermark into the cache and returns the effective value.
    pub async fn load_watermark(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<i64>, StorageError> {
        let store = &self.store;
        let persisted = self
            .retry
            .run("load_watermark", move || store.load_watermark(symbol, timeframe))
            .await?;

        let key = (symbol.to_string(), timeframe);
        let effective = match (self.watermarks.get(&key).copied(), persisted) {
            (Some(cached), Some(stored)) => Some(cached.max(stored)),
            (cached, stored) => cached.or(stored),
        };
        if let Some(wm) = effective {
            self.watermarks.insert(key, wm);
        }
        Ok(effective)
    }

    /// Latest processed bucket end for (symbol, timeframe), if known.
    pub fn watermark(&self, symbol: &str, timeframe: Timeframe) -> Option<i64> {
        self.watermarks
            .get(&(symbol.to_string(), timeframe))
            .copied()
    }

    /// Moves the watermark forward. Returns false (and changes nothing) if
    /// `watermark` is not beyond the current one.
    pub fn advance_watermark(&mut self, symbol: &str, timeframe: Timeframe, watermark: i64) -> bool {
        let key = (symbol.to_string(), timeframe);
        match self.watermarks.get(&key) {
            Some(current) if *current >= watermark => false,
            _ => {
                self.watermarks.insert(key.clone(), watermark);
                self.dirty.insert(key);
                true
            }
        }
    }

    pub fn has_pending_watermarks(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Writes the advanced watermarks of `symbol` back to the store.
    pub async fn persist_watermarks(&mut self, symbol: &str) -> Result<(), StorageError> {
        let keys: Vec<(String, Timeframe)> = self
            .dirty
            .iter()
            .filter(|(s, _)| s == symbol)
            .cloned()
            .collect();

        for key in keys {
            let Some(watermark) = self.watermarks.get(&key).copied() else {
                self.dirty.remove(&key);
                continue;
            };
            let store = &self.store;
            let (sym, timeframe) = (key.0.as_str(), key.1);
            self.retry
                .run("save_watermark", move || {
                    store.save_watermark(sym, timeframe, watermark)
                })
                .await?;
            self.dirty.remove(&key);
        }
        Ok(())
    }

    /// The newest `limit` stored candles of (symbol, timeframe), oldest first.
    pub async fn recent_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let store = &self.store;
        let records = self
            .retry
            .run("recent", move || {
                store.recent(symbol, timeframe, EntityKind::Candle, limit)
            })
            .await?;

        let mut candles = Vec::with_capacity(records.len());
        for record in records {
            match record.candle() {
                Some(candle) => candles.push(candle),
                None => warn!(
                    "DedupStateStore: undecodable candle payload for {}, skipped",
                    record.identity_key
                ),
            }
        }
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::bucketing::Bucket;
    use crate::infrastructure::repositories::InMemoryEntityStore;
    use rust_decimal_macros::dec;

    fn candle(i: i64) -> Candle {
        Candle::opening(
            "ETH/USD",
            Timeframe::ONE_MIN,
            Bucket {
                start: i * 60_000,
                end: (i + 1) * 60_000,
            },
            dec!(2000),
            5,
        )
        .into_closed()
    }

    fn dedup(store: Arc<InMemoryEntityStore>) -> DedupStateStore {
        DedupStateStore::new(store, RetryPolicy::no_retry())
    }

    #[tokio::test]
    async fn test_try_emit_only_once() {
        let gate = dedup(Arc::new(InMemoryEntityStore::new()));
        let record = DedupRecord::for_candle(&candle(0), 0).unwrap();
        assert!(gate.try_emit(&record).await.unwrap());
        assert!(!gate.try_emit(&record).await.unwrap());
        assert!(gate.lookup(&record.identity_key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_two_gates_share_one_store() {
        let store = Arc::new(InMemoryEntityStore::new());
        let a = dedup(store.clone());
        let b = dedup(store);
        let record = DedupRecord::for_candle(&candle(3), 0).unwrap();
        assert!(a.try_emit(&record).await.unwrap());
        assert!(!b.try_emit(&record).await.unwrap());
    }

    #[tokio::test]
    async fn test_watermark_is_monotonic_and_persisted() {
        let store = Arc::new(InMemoryEntityStore::new());
        let mut gate = dedup(store.clone());

        assert!(gate.advance_watermark("ETH/USD", Timeframe::ONE_MIN, 120_000));
        assert!(!gate.advance_watermark("ETH/USD", Timeframe::ONE_MIN, 60_000));
        assert_eq!(gate.watermark("ETH/USD", Timeframe::ONE_MIN), Some(120_000));
        assert!(gate.has_pending_watermarks());

        gate.persist_watermarks("ETH/USD").await.unwrap();
        assert!(!gate.has_pending_watermarks());

        let mut restarted = dedup(store);
        assert_eq!(restarted.watermark("ETH/USD", Timeframe::ONE_MIN), None);
        assert_eq!(
            restarted
                .load_watermark("ETH/USD", Timeframe::ONE_MIN)
                .await
                .unwrap(),
            Some(120_000)
        );
    }

    #[tokio::test]
    async fn test_recent_candles_decodes_tail() {
        let store = Arc::new(InMemoryEntityStore::new());
        let gate = dedup(store);
        let records: Vec<_> = (0..4)
            .map(|i| DedupRecord::for_candle(&candle(i), 0).unwrap())
            .collect();
        assert_eq!(
            gate.try_emit_bulk(&records).await.unwrap(),
            vec![true; 4]
        );

        let tail = gate
            .recent_candles("ETH/USD", Timeframe::ONE_MIN, 2)
            .await
            .unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].bucket_start, 120_000);
        assert_eq!(tail[1].bucket_start, 180_000);
    }
}
