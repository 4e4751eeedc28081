//! CSV adapters: historical bar reader and closed-candle storage.
//!
//! Bar files live at `{folder}/{symbol}.csv` with a header row
//! `date,open,high,low,close,volume`. Candle exports are written to
//! `{folder}/{symbol}_{timeframe}.csv`.

use crate::domain::events::{DetectionEvent, EventListener, EventPayload};
use crate::domain::market::candle::{Candle, HistoricalBar};
use crate::domain::market::timeframe::Timeframe;
use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
struct BarRow {
    #[serde(alias = "Date", alias = "timestamp", alias = "datetime")]
    date: String,
    #[serde(alias = "Open")]
    open: String,
    #[serde(alias = "High")]
    high: String,
    #[serde(alias = "Low")]
    low: String,
    #[serde(alias = "Close")]
    close: String,
    #[serde(alias = "Volume", default)]
    volume: Option<String>,
}

/// Reads historical OHLCV bars from per-symbol CSV files.
#[derive(Debug, Clone)]
pub struct CsvBarReader {
    folder: PathBuf,
    timeframe: Timeframe,
    /// chrono format of the date column; epoch millis or RFC 3339 when unset
    date_format: Option<String>,
    /// Offset applied to dates without a zone
    utc_offset_minutes: i32,
}

impl CsvBarReader {
    pub fn new(folder: impl Into<PathBuf>, timeframe: Timeframe) -> Self {
        Self {
            folder: folder.into(),
            timeframe,
            date_format: None,
            utc_offset_minutes: 0,
        }
    }

    pub fn with_date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = Some(format.into());
        self
    }

    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.folder.join(format!("{}.csv", symbol))
    }

    /// Reads every bar of `symbol`, in file order.
    pub fn read(&self, symbol: &str) -> Result<Vec<HistoricalBar>> {
        let path = self.path_for(symbol);
        let file =
            File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
        self.read_from(symbol, file)
            .with_context(|| format!("Failed to read bars from {}", path.display()))
    }

    pub fn read_from<R: std::io::Read>(&self, symbol: &str, reader: R) -> Result<Vec<HistoricalBar>> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut bars = Vec::new();

        for (line, result) in rdr.deserialize::<BarRow>().enumerate() {
            let row = result.with_context(|| format!("Malformed row {}", line + 1))?;
            let bucket_start = self
                .parse_date(&row.date)
                .with_context(|| format!("Bad date '{}' on row {}", row.date, line + 1))?;

            bars.push(HistoricalBar {
                symbol: symbol.to_string(),
                timeframe: self.timeframe,
                bucket_start,
                open: parse_price(&row.open, "open")?,
                high: parse_price(&row.high, "high")?,
                low: parse_price(&row.low, "low")?,
                close: parse_price(&row.close, "close")?,
                volume: match row.volume.as_deref() {
                    None | Some("") => 0,
                    Some(v) => parse_volume(v)?,
                },
            });
        }

        info!(
            "CsvBarReader: loaded {} {} bars for {}",
            bars.len(),
            self.timeframe,
            symbol
        );
        Ok(bars)
    }

    fn parse_date(&self, raw: &str) -> Result<i64> {
        if let Some(format) = &self.date_format {
            if let Ok(dt) = DateTime::parse_from_str(raw, format) {
                return Ok(dt.timestamp_millis());
            }
            let naive = NaiveDateTime::parse_from_str(raw, format)?;
            return Ok(Utc.from_utc_datetime(&naive).timestamp_millis()
                - i64::from(self.utc_offset_minutes) * 60_000);
        }
        if let Ok(ms) = raw.parse::<i64>() {
            return Ok(ms);
        }
        Ok(DateTime::parse_from_rfc3339(raw)?.timestamp_millis())
    }
}

fn parse_price(raw: &str, field: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("Invalid {} '{}'", field, raw))
}

fn parse_volume(raw: &str) -> Result<i64> {
    if let Ok(v) = raw.parse::<i64>() {
        return Ok(v);
    }
    // Some exports write volumes as "1200.0"
    let d = Decimal::from_str(raw).with_context(|| format!("Invalid volume '{}'", raw))?;
    if !d.fract().is_zero() {
        bail!("Fractional volume '{}'", raw);
    }
    i64::try_from(d).with_context(|| format!("Volume out of range '{}'", raw))
}

#[derive(Debug, Serialize)]
struct CandleRow<'a> {
    date: String,
    open: &'a Decimal,
    high: &'a Decimal,
    low: &'a Decimal,
    close: &'a Decimal,
    volume: u64,
}

/// Buffers closed candles from the event stream and writes them as CSV on `save`.
pub struct CsvCandleStorage {
    folder: PathBuf,
    buffer: Mutex<BTreeMap<(String, Timeframe), Vec<Candle>>>,
}

impl CsvCandleStorage {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            buffer: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn on_candle(&self, candle: &Candle) {
        match self.buffer.lock() {
            Ok(mut buffer) => buffer
                .entry((candle.symbol.clone(), candle.timeframe))
                .or_default()
                .push(candle.clone()),
            Err(e) => error!("CsvCandleStorage: buffer poisoned: {}", e),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer
            .lock()
            .map(|b| b.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn path_for(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        let safe_symbol = symbol.replace(['/', '\\'], "_");
        self.folder.join(format!("{}_{}.csv", safe_symbol, timeframe))
    }

    /// Appends buffered candles to their files and clears the buffer.
    /// Returns the number of candles written.
    pub fn save(&self) -> Result<usize> {
        let drained = {
            let mut buffer = self
                .buffer
                .lock()
                .map_err(|e| anyhow::anyhow!("CSV buffer poisoned: {}", e))?;
            std::mem::take(&mut *buffer)
        };

        if drained.is_empty() {
            return Ok(0);
        }

        fs::create_dir_all(&self.folder)
            .with_context(|| format!("Failed to create {}", self.folder.display()))?;

        let mut written = 0;
        for ((symbol, timeframe), candles) in drained {
            let path = self.path_for(&symbol, timeframe);
            written += write_candles(&path, &candles)?;
        }

        info!(
            "CsvCandleStorage: wrote {} candles to {}",
            written,
            self.folder.display()
        );
        Ok(written)
    }
}

fn write_candles(path: &Path, candles: &[Candle]) -> Result<usize> {
    let file_exists = path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut wtr = csv::WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    for candle in candles {
        let date = Utc
            .timestamp_millis_opt(candle.bucket_start)
            .single()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| candle.bucket_start.to_string());
        wtr.serialize(CandleRow {
            date,
            open: &candle.open,
            high: &candle.high,
            low: &candle.low,
            close: &candle.close,
            volume: candle.volume,
        })
        .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    wtr.flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(candles.len())
}

impl EventListener for CsvCandleStorage {
    fn on_event(&self, event: &DetectionEvent) {
        if let EventPayload::Candle(candle) = &event.payload {
            self.on_candle(candle);
        }
    }
}
