use crate::domain::identity::{DedupRecord, EntityKind, identity_digest};
use crate::domain::market::timeframe::Timeframe;
use crate::domain::repositories::EntityStore;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

/// SQLite-backed `EntityStore`.
///
/// Check-and-set is `INSERT OR IGNORE` on the identity digest; the affected
/// row count tells whether this call was the first to record it.
pub struct SqliteEntityStore {
    database: Database,
}

impl SqliteEntityStore {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Connects to `db_url` and applies the schema.
    pub async fn connect(db_url: &str) -> Result<Self> {
        Ok(Self::new(Database::new(db_url).await?))
    }

    fn row_to_record(row: &SqliteRow) -> Result<DedupRecord> {
        let kind: String = row.try_get("kind")?;
        let timeframe: String = row.try_get("timeframe")?;
        let payload: String = row.try_get("payload")?;
        Ok(DedupRecord {
            kind: EntityKind::from_str(&kind)?,
            identity_key: row.try_get("identity_key")?,
            symbol: row.try_get("symbol")?,
            timeframe: Timeframe::from_str(&timeframe)?,
            event_time: row.try_get("event_time")?,
            emitted_at: row.try_get("emitted_at")?,
            payload: serde_json::from_str(&payload).context("Corrupt emission payload")?,
        })
    }
}

const INSERT_EMISSION: &str = r#"
    INSERT OR IGNORE INTO emissions
        (digest, identity_key, kind, symbol, timeframe, event_time, emitted_at, payload)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
"#;

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn insert_incremental(&self, record: &DedupRecord) -> Result<bool> {
        let result = sqlx::query(INSERT_EMISSION)
            .bind(identity_digest(&record.identity_key))
            .bind(&record.identity_key)
            .bind(record.kind.as_str())
            .bind(&record.symbol)
            .bind(record.timeframe.to_string())
            .bind(record.event_time)
            .bind(record.emitted_at)
            .bind(record.payload.to_string())
            .execute(&self.database.pool)
            .await
            .with_context(|| format!("Failed to record emission {}", record.identity_key))?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_bulk(&self, records: &[DedupRecord]) -> Result<Vec<bool>> {
        let mut tx = self
            .database
            .pool
            .begin()
            .await
            .context("Failed to open bulk insert transaction")?;

        let mut inserted = Vec::with_capacity(records.len());
        for record in records {
            let result = sqlx::query(INSERT_EMISSION)
                .bind(identity_digest(&record.identity_key))
                .bind(&record.identity_key)
                .bind(record.kind.as_str())
                .bind(&record.symbol)
                .bind(record.timeframe.to_string())
                .bind(record.event_time)
                .bind(record.emitted_at)
                .bind(record.payload.to_string())
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to record emission {}", record.identity_key))?;
            inserted.push(result.rows_affected() == 1);
        }

        tx.commit()
            .await
            .context("Failed to commit bulk insert")?;
        Ok(inserted)
    }

    async fn lookup(&self, identity_key: &str) -> Result<Option<DedupRecord>> {
        let row = sqlx::query("SELECT * FROM emissions WHERE digest = ?")
            .bind(identity_digest(identity_key))
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to look up emission")?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn recent(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        kind: EntityKind,
        limit: usize,
    ) -> Result<Vec<DedupRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM emissions
            WHERE symbol = ? AND timeframe = ? AND kind = ?
            ORDER BY event_time DESC
            LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .bind(kind.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to fetch recent emissions")?;

        let mut records = rows
            .iter()
            .map(Self::row_to_record)
            .collect::<Result<Vec<_>>>()?;
        records.reverse();
        Ok(records)
    }

    async fn load_watermark(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<i64>> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT watermark FROM watermarks WHERE symbol = ? AND timeframe = ?",
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load watermark")?;

        Ok(row.map(|(wm,)| wm))
    }

    async fn save_watermark(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        watermark: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO watermarks (symbol, timeframe, watermark, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(symbol, timeframe) DO UPDATE SET
                watermark = MAX(watermarks.watermark, excluded.watermark),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(symbol)
        .bind(timeframe.to_string())
        .bind(watermark)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.database.pool)
        .await
        .context("Failed to save watermark")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::detection::pivot::{Pivot, PivotKind, PivotStatus};
    use crate::domain::market::bucketing::Bucket;
    use crate::domain::market::candle::Candle;
    use rust_decimal_macros::dec;

    async fn store() -> SqliteEntityStore {
        SqliteEntityStore::connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite")
    }

    fn candle(i: i64) -> Candle {
        Candle::opening(
            "MSFT",
            Timeframe::FIVE_MIN,
            Bucket {
                start: i * 300_000,
                end: (i + 1) * 300_000,
            },
            dec!(410.25),
            100,
        )
        .into_closed()
    }

    #[tokio::test]
    async fn test_insert_or_ignore_reports_first_writer() {
        let store = store().await;
        let record = DedupRecord::for_candle(&candle(0), 1).unwrap();

        assert!(store.insert_incremental(&record).await.unwrap());
        assert!(!store.insert_incremental(&record).await.unwrap());

        let loaded = store.lookup(&record.identity_key).await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.candle().unwrap(), candle(0));
    }

    #[tokio::test]
    async fn test_bulk_insert_flags() {
        let store = store().await;
        store
            .insert_incremental(&DedupRecord::for_candle(&candle(1), 0).unwrap())
            .await
            .unwrap();

        let batch: Vec<_> = (0..3)
            .map(|i| DedupRecord::for_candle(&candle(i), 0).unwrap())
            .collect();
        let flags = store.insert_bulk(&batch).await.unwrap();
        assert_eq!(flags, vec![true, false, true]);
    }

    #[tokio::test]
    async fn test_recent_filters_by_kind_and_orders_ascending() {
        let store = store().await;
        for i in 0..5 {
            store
                .insert_incremental(&DedupRecord::for_candle(&candle(i), 0).unwrap())
                .await
                .unwrap();
        }
        let pivot = Pivot {
            symbol: "MSFT".to_string(),
            timeframe: Timeframe::FIVE_MIN,
            index: 2,
            time: 600_000,
            price: dec!(411),
            kind: PivotKind::High,
            status: PivotStatus::Confirmed,
        };
        store
            .insert_incremental(&DedupRecord::for_pivot(&pivot, 0).unwrap())
            .await
            .unwrap();

        let tail = store
            .recent("MSFT", Timeframe::FIVE_MIN, EntityKind::Candle, 3)
            .await
            .unwrap();
        let starts: Vec<i64> = tail.iter().map(|r| r.event_time).collect();
        assert_eq!(starts, vec![600_000, 900_000, 1_200_000]);
    }

    #[tokio::test]
    async fn test_watermark_upsert_never_moves_back() {
        let store = store().await;
        assert_eq!(
            store.load_watermark("MSFT", Timeframe::FIVE_MIN).await.unwrap(),
            None
        );
        store
            .save_watermark("MSFT", Timeframe::FIVE_MIN, 900_000)
            .await
            .unwrap();
        store
            .save_watermark("MSFT", Timeframe::FIVE_MIN, 300_000)
            .await
            .unwrap();
        assert_eq!(
            store.load_watermark("MSFT", Timeframe::FIVE_MIN).await.unwrap(),
            Some(900_000)
        );
    }
}
