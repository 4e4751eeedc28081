//! Content-addressed identities for every emitted entity.
//!
//! The canonical identity key is a readable string built from the entity's
//! defining fields (see `Candle::identity_key`, `Pivot::identity_key`,
//! `Pattern::identity_key`). Stores index records by its SHA-256 digest.

use crate::domain::detection::pattern::Pattern;
use crate::domain::errors::StorageError;
use crate::domain::detection::pivot::Pivot;
use crate::domain::market::candle::Candle;
use crate::domain::market::timeframe::Timeframe;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Candle,
    Pivot,
    Pattern,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Candle => "candle",
            EntityKind::Pivot => "pivot",
            EntityKind::Pattern => "pattern",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "candle" => Ok(EntityKind::Candle),
            "pivot" => Ok(EntityKind::Pivot),
            "pattern" => Ok(EntityKind::Pattern),
            _ => anyhow::bail!("Unknown entity kind: {}", s),
        }
    }
}

/// Hex SHA-256 of a canonical identity key.
pub fn identity_digest(identity_key: &str) -> String {
    hex::encode(Sha256::digest(identity_key.as_bytes()))
}

fn encode<T: Serialize>(identity_key: &str, value: &T) -> Result<serde_json::Value, StorageError> {
    serde_json::to_value(value).map_err(|e| StorageError::Payload {
        identity_key: identity_key.to_string(),
        reason: e.to_string(),
    })
}

/// One emission, as recorded by the dedup store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub kind: EntityKind,
    pub identity_key: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Candle bucket start, pivot time or pattern confirmation time.
    pub event_time: i64,
    pub emitted_at: i64,
    pub payload: serde_json::Value,
}

impl DedupRecord {
    pub fn for_candle(candle: &Candle, emitted_at: i64) -> Result<Self, StorageError> {
        let identity_key = candle.identity_key();
        Ok(Self {
            kind: EntityKind::Candle,
            payload: encode(&identity_key, candle)?,
            identity_key,
            symbol: candle.symbol.clone(),
            timeframe: candle.timeframe,
            event_time: candle.bucket_start,
            emitted_at,
        })
    }

    pub fn for_pivot(pivot: &Pivot, emitted_at: i64) -> Result<Self, StorageError> {
        let identity_key = pivot.identity_key();
        Ok(Self {
            kind: EntityKind::Pivot,
            payload: encode(&identity_key, pivot)?,
            identity_key,
            symbol: pivot.symbol.clone(),
            timeframe: pivot.timeframe,
            event_time: pivot.time,
            emitted_at,
        })
    }

    pub fn for_pattern(pattern: &Pattern, emitted_at: i64) -> Result<Self, StorageError> {
        let identity_key = pattern.identity_key();
        Ok(Self {
            kind: EntityKind::Pattern,
            payload: encode(&identity_key, pattern)?,
            identity_key,
            symbol: pattern.symbol.clone(),
            timeframe: pattern.timeframe,
            event_time: pattern.confirmation_time.unwrap_or(pattern.end_time),
            emitted_at,
        })
    }

    pub fn digest(&self) -> String {
        identity_digest(&self.identity_key)
    }

    /// Decodes the payload of a candle record.
    pub fn candle(&self) -> Option<Candle> {
        if self.kind != EntityKind::Candle {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::bucketing::Bucket;
    use rust_decimal_macros::dec;

    #[test]
    fn test_digest_is_stable() {
        let a = identity_digest("candle:AAPL:1m:0");
        let b = identity_digest("candle:AAPL:1m:0");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, identity_digest("candle:AAPL:1m:60000"));
    }

    #[test]
    fn test_candle_record_round_trips_payload() {
        let candle = Candle::opening(
            "AAPL",
            Timeframe::ONE_MIN,
            Bucket { start: 0, end: 60_000 },
            dec!(101.25),
            7,
        )
        .into_closed();

        let record = DedupRecord::for_candle(&candle, 123).unwrap();
        assert_eq!(record.kind, EntityKind::Candle);
        assert_eq!(record.identity_key, "candle:AAPL:1m:0");
        assert_eq!(record.candle(), Some(candle));
    }

    #[test]
    fn test_unencodable_payload_is_an_error() {
        use std::collections::HashMap;

        // JSON object keys must be strings
        let value: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);
        let err = encode("candle:AAPL:1m:0", &value).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Payload { ref identity_key, .. } if identity_key == "candle:AAPL:1m:0"
        ));
    }
}
