use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Shared SQLite pool with the swingscope schema applied
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        let in_memory = db_url.contains(":memory:");

        // Ensure the directory exists if it's a file path
        if !in_memory && let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let mut options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("Invalid database url {}", db_url))?
            .create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to :memory: is a distinct database
        let max_connections = if in_memory { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        // 1. Emitted identities (dedup ledger + candle tail for restarts)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS emissions (
                digest TEXT PRIMARY KEY,
                identity_key TEXT NOT NULL,
                kind TEXT NOT NULL,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                event_time INTEGER NOT NULL,
                emitted_at INTEGER NOT NULL,
                payload TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create emissions table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_emissions_series
            ON emissions (symbol, timeframe, kind, event_time);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create emissions index")?;

        // 2. Watermarks
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS watermarks (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                watermark INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (symbol, timeframe)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create watermarks table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
