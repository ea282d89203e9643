//! Cache Module
//!
//! In-memory segment store, envelope encoding and byte accounting.

mod entry;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::{current_timestamp_ms, validate_segment_name, CachedItem, Envelope, Key};
pub use stats::CacheStats;
pub use store::{Document, Store};

// == Public Constants ==
/// Fixed per-record cost added to every sized envelope (envelope JSON without value)
pub const ENVELOPE_OVERHEAD_BYTES: u64 = 53;

/// Largest delay a timer is armed for (32-bit signed millisecond range)
pub const MAX_TIMER_DELAY_MS: u64 = 2_147_483_647;
