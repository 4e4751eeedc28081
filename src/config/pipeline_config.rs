//! Aggregation and pipeline configuration parsing from environment variables.

use crate::domain::market::bucketing::{BucketClock, SessionWindow};
use crate::domain::market::tick::TimestampUnit;
use crate::domain::market::timeframe::Timeframe;
use anyhow::{Context, Result, bail};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// How ticks become candles, and which timeframes are analysed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationConfig {
    /// Width of candles built directly from ticks
    pub base_timeframe: Timeframe,
    /// Analysed timeframes; each must be a multiple of the base
    pub timeframes: Vec<Timeframe>,
    pub tolerance_ms: i64,
    pub timestamp_unit: TimestampUnit,
    pub session: Option<SessionWindow>,
    pub utc_offset_minutes: i32,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            base_timeframe: Timeframe::ONE_MIN,
            timeframes: vec![Timeframe::ONE_MIN],
            tolerance_ms: 2_000,
            timestamp_unit: TimestampUnit::Millis,
            session: None,
            utc_offset_minutes: 0,
        }
    }
}

impl AggregationConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let base_timeframe = match env::var("BASE_TIMEFRAME") {
            Ok(v) => Timeframe::from_str(&v).context("Failed to parse BASE_TIMEFRAME")?,
            Err(_) => defaults.base_timeframe,
        };

        let timeframes = match env::var("TIMEFRAMES") {
            Ok(v) => v
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(Timeframe::from_str)
                .collect::<Result<Vec<_>>>()
                .context("Failed to parse TIMEFRAMES")?,
            Err(_) => vec![base_timeframe],
        };

        let session = match (env::var("SESSION_OPEN"), env::var("SESSION_CLOSE")) {
            (Ok(open), Ok(close)) => Some(
                SessionWindow::parse(&open, &close).context("Failed to parse session window")?,
            ),
            (Err(_), Err(_)) => None,
            _ => bail!("SESSION_OPEN and SESSION_CLOSE must be set together"),
        };

        let timestamp_unit = match env::var("TICK_TIMESTAMP_UNIT") {
            Ok(v) => TimestampUnit::from_str(&v)?,
            Err(_) => defaults.timestamp_unit,
        };

        Ok(Self {
            base_timeframe,
            timeframes,
            tolerance_ms: env::var("TICK_TOLERANCE_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse::<i64>()
                .unwrap_or(defaults.tolerance_ms),
            timestamp_unit,
            session,
            utc_offset_minutes: env::var("SESSION_UTC_OFFSET_MINUTES")
                .unwrap_or_else(|_| "0".to_string())
                .parse::<i32>()
                .unwrap_or(0),
        })
    }

    pub fn clock(&self) -> BucketClock {
        BucketClock::new(self.session, self.utc_offset_minutes)
    }

    /// Analysed timeframes, deduplicated and ascending, always including the base.
    pub fn analysed_timeframes(&self) -> Vec<Timeframe> {
        let mut all = self.timeframes.clone();
        all.push(self.base_timeframe);
        all.sort();
        all.dedup();
        all
    }

    pub fn validate(&self) -> Result<()> {
        if self.tolerance_ms < 0 {
            bail!("TICK_TOLERANCE_MS must be >= 0, got {}", self.tolerance_ms);
        }
        for tf in &self.timeframes {
            if !tf.is_multiple_of(self.base_timeframe) {
                bail!(
                    "Timeframe {} is not a multiple of the base timeframe {}",
                    tf,
                    self.base_timeframe
                );
            }
            if self.session.is_some() && tf.to_minutes() > Timeframe::ONE_DAY.to_minutes() {
                bail!("Timeframe {} exceeds one session day", tf);
            }
        }
        Ok(())
    }
}

/// Pipeline environment configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineEnvConfig {
    /// Bound of each per-symbol input queue
    pub queue_capacity: usize,
    /// Closed candles reloaded per timeframe on restart
    pub rebuild_tail: usize,
    /// Closed candles kept in memory per timeframe
    pub series_capacity: usize,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for PipelineEnvConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1_024,
            rebuild_tail: 300,
            series_capacity: 1_000,
            retry_attempts: 5,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

impl PipelineEnvConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            queue_capacity: env::var("PIPELINE_QUEUE_CAPACITY")
                .unwrap_or_else(|_| "1024".to_string())
                .parse::<usize>()
                .unwrap_or(defaults.queue_capacity),
            rebuild_tail: env::var("PIPELINE_REBUILD_TAIL")
                .unwrap_or_else(|_| "300".to_string())
                .parse::<usize>()
                .unwrap_or(defaults.rebuild_tail),
            series_capacity: env::var("PIPELINE_SERIES_CAPACITY")
                .unwrap_or_else(|_| "1000".to_string())
                .parse::<usize>()
                .unwrap_or(defaults.series_capacity),
            retry_attempts: env::var("STORAGE_RETRY_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse::<u32>()
                .unwrap_or(defaults.retry_attempts),
            retry_backoff: Duration::from_millis(
                env::var("STORAGE_RETRY_BACKOFF_MS")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse::<u64>()
                    .unwrap_or(50),
            ),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            bail!("PIPELINE_QUEUE_CAPACITY must be >= 1");
        }
        if self.retry_attempts == 0 {
            bail!("STORAGE_RETRY_ATTEMPTS must be >= 1");
        }
        if self.series_capacity < self.rebuild_tail {
            bail!(
                "PIPELINE_SERIES_CAPACITY ({}) must hold the rebuild tail ({})",
                self.series_capacity,
                self.rebuild_tail
            );
        }
        Ok(())
    }
}

/// Storage environment configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEnvConfig {
    pub database_url: String,
}

impl Default for StorageEnvConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/swingscope.db".to_string(),
        }
    }
}

impl StorageEnvConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/swingscope.db".to_string()),
        }
    }
}
