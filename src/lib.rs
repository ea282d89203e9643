//! catbox_json - A durable single-file JSON cache engine
//!
//! Keeps a segmented key/value working set in memory, persists all of it to one
//! JSON file with debounced full rewrites, expires entries by TTL and enforces a
//! total byte ceiling.

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod tasks;

pub use cache::{CacheStats, CachedItem, Key};
pub use config::Config;
pub use connection::{Connection, ConnectionState};
pub use error::{CacheError, Result};
pub use tasks::SaveFailure;
