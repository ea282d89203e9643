//! Cache Store Module
//!
//! Segment-partitioned envelope storage with running byte accounting.

use std::collections::HashMap;

use crate::cache::{Envelope, Key};
use crate::error::{CacheError, Result};

/// On-disk document shape: segment -> id -> envelope.
pub type Document = HashMap<String, HashMap<String, Envelope>>;

// == Cache Store ==
/// In-memory cache state while a connection is started.
///
/// The running `byte_size` always equals the sum of the accounted sizes of
/// the live envelopes.
#[derive(Debug, Default)]
pub struct Store {
    /// segment -> id -> envelope
    segments: Document,
    /// Sum of accounted envelope sizes
    byte_size: u64,
}

impl Store {
    // == Constructor ==
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from a restored document, recomputing the byte total.
    ///
    /// Returns `None` when the accounted sizes do not fit in a `u64`.
    pub fn from_document(segments: Document) -> Option<Self> {
        let byte_size = segments
            .values()
            .flat_map(|ids| ids.values())
            .try_fold(0u64, |total, envelope| {
                total.checked_add(envelope.accounted_size())
            })?;

        Some(Self {
            segments,
            byte_size,
        })
    }

    /// Parses a full cache document.
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        let document: Document = serde_json::from_slice(bytes)?;
        Self::from_document(document)
            .ok_or_else(|| serde::de::Error::custom("accounted byte sizes overflow"))
    }

    /// Serializes the whole store as a cache document.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.segments).map_err(CacheError::Serialization)
    }

    // == Get ==
    /// Looks up the envelope stored at `key`.
    pub fn get(&self, key: &Key) -> Option<&Envelope> {
        self.segments.get(&key.segment)?.get(&key.id)
    }

    // == Insert ==
    /// Stores `envelope` at `key`, replacing any previous envelope.
    ///
    /// With a non-zero `max_byte_size` the write is checked as a logical
    /// replace: the old envelope's size is released before the new one is
    /// counted. A rejected write leaves the store untouched, including the
    /// old envelope.
    ///
    /// Returns the replaced envelope, if any.
    pub fn insert(
        &mut self,
        key: &Key,
        envelope: Envelope,
        max_byte_size: u64,
    ) -> Result<Option<Envelope>> {
        let previous_size = self.get(key).map(Envelope::accounted_size).unwrap_or(0);
        // An overflowing total can never fit, with or without a ceiling
        let requested = (self.byte_size - previous_size)
            .checked_add(envelope.accounted_size())
            .ok_or(CacheError::CapacityExceeded {
                requested: u64::MAX,
                limit: max_byte_size,
            })?;

        if max_byte_size > 0 && requested > max_byte_size {
            return Err(CacheError::CapacityExceeded {
                requested,
                limit: max_byte_size,
            });
        }

        // Segments are created lazily on the first accepted write
        let previous = self
            .segments
            .entry(key.segment.clone())
            .or_default()
            .insert(key.id.clone(), envelope);
        self.byte_size = requested;

        Ok(previous)
    }

    // == Remove ==
    /// Removes the envelope at `key`, releasing its accounted size.
    ///
    /// Empty segments are kept.
    pub fn remove(&mut self, key: &Key) -> Option<Envelope> {
        let removed = self.segments.get_mut(&key.segment)?.remove(&key.id)?;
        self.byte_size -= removed.accounted_size();
        Some(removed)
    }

    /// Iterates every stored `(key, envelope)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (Key, &Envelope)> {
        self.segments.iter().flat_map(|(segment, ids)| {
            ids.iter()
                .map(move |(id, envelope)| (Key::new(segment.as_str(), id.as_str()), envelope))
        })
    }

    // == Length ==
    /// Returns the number of stored envelopes across all segments.
    pub fn len(&self) -> usize {
        self.segments.values().map(HashMap::len).sum()
    }

    // == Is Empty ==
    /// Returns true if no envelope is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of segments, including emptied ones.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Running byte total.
    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }
}
