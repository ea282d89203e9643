//! Cache Entry Module
//!
//! Keys, the persisted envelope record and its value codec.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::cache::ENVELOPE_OVERHEAD_BYTES;
use crate::error::{CacheError, Result};

// == Key ==
/// Identifies one cached value: a segment namespace plus an id inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    pub segment: String,
    pub id: String,
}

impl Key {
    pub fn new(segment: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            segment: segment.into(),
            id: id.into(),
        }
    }
}

/// Checks a segment name: it must be non-empty and free of NUL bytes.
pub fn validate_segment_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CacheError::InvalidSegment("Empty string"));
    }

    if name.contains('\0') {
        return Err(CacheError::InvalidSegment("Includes null character"));
    }

    Ok(())
}

// == Envelope ==
/// Persisted record wrapping one serialized value with its metadata.
///
/// Field names match the on-disk document: `item`, `stored`, `ttl` and the
/// optional `byteSize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The value as a JSON text
    pub item: String,
    /// Store timestamp (Unix milliseconds)
    pub stored: u64,
    /// Time to live in milliseconds
    pub ttl: u64,
    /// Accounted size, absent when the byte ceiling is disabled
    #[serde(rename = "byteSize", default, skip_serializing_if = "Option::is_none")]
    pub byte_size: Option<u64>,
}

impl Envelope {
    // == Encode ==
    /// Serializes `value` into a fresh envelope stamped with the current time.
    ///
    /// When `account_size` is set the envelope carries its approximate
    /// on-disk cost: the fixed overhead plus the payload, segment and id lengths.
    pub fn encode<T: Serialize + ?Sized>(
        key: &Key,
        value: &T,
        ttl: Duration,
        account_size: bool,
    ) -> Result<Self> {
        let item = serde_json::to_string(value).map_err(CacheError::Serialization)?;

        let byte_size = account_size.then(|| {
            ENVELOPE_OVERHEAD_BYTES
                + item.len() as u64
                + key.segment.len() as u64
                + key.id.len() as u64
        });

        Ok(Self {
            item,
            stored: current_timestamp_ms(),
            ttl: duration_to_ms(ttl),
            byte_size,
        })
    }

    // == Decode ==
    /// Parses the stored payload back into a value.
    pub fn decode<T: DeserializeOwned>(&self, key: &Key) -> Result<T> {
        serde_json::from_str(&self.item).map_err(|source| CacheError::CorruptValue {
            segment: key.segment.clone(),
            id: key.id.clone(),
            source,
        })
    }

    /// Accounted size, zero for unsized envelopes.
    pub fn accounted_size(&self) -> u64 {
        self.byte_size.unwrap_or(0)
    }

    /// Expiration timestamp (Unix milliseconds).
    pub fn expires_at(&self) -> u64 {
        self.stored.saturating_add(self.ttl)
    }

    /// Time left before expiry measured from `now`, `None` once expired.
    pub fn time_left(&self, now: u64) -> Option<Duration> {
        let expires_at = self.expires_at();
        if expires_at > now {
            Some(Duration::from_millis(expires_at - now))
        } else {
            None
        }
    }
}

// == Cached Item ==
/// Result of a successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedItem<T> {
    /// The decoded value
    pub item: T,
    /// Store timestamp (Unix milliseconds)
    pub stored: u64,
    /// Time to live the value was stored with
    pub ttl: Duration,
}

impl<T> CachedItem<T> {
    /// Store timestamp as a UTC date.
    pub fn stored_at(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.stored)
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_to_ms)
        .unwrap_or(0)
}

pub(crate) fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
