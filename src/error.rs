//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use std::path::PathBuf;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Rejected configuration, raised when a connection is created
    #[error("Invalid configuration: {0}")]
    Construction(String),

    /// Operation attempted before `start` or after `stop`
    #[error("Connection not started")]
    NotStarted,

    /// Cache file could not be opened, read or parsed at start
    #[error("Failed to restore cache from {}: {source}", path.display())]
    Restore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Value could not be encoded for storage
    #[error("Failed to serialize value: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Stored payload could not be decoded
    #[error("Bad value content for {segment}/{id}: {source}")]
    CorruptValue {
        segment: String,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    /// Write would push the cache past its byte ceiling
    #[error("Cache size limit reached: write needs {requested} bytes, limit is {limit}")]
    CapacityExceeded { requested: u64, limit: u64 },

    /// Segment name rejected by validation
    #[error("Invalid segment name: {0}")]
    InvalidSegment(&'static str),

    /// File I/O failure while saving
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
